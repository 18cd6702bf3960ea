use tether::ask;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let message = std::env::var("TETHER_MESSAGE")
        .unwrap_or_else(|_| "What is 12 * 7? Use the calculator.".to_owned());

    let view = ask(message).await?;
    for message in &view.messages {
        println!("{:?}: {}", message.kind(), message.content());
    }
    Ok(())
}
