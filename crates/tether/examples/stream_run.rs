use tether::{Client, EngineConfig, StepOutcome, StreamEvent};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let message = std::env::var("TETHER_MESSAGE")
        .unwrap_or_else(|_| "Write a short essay about borrow checking.".to_owned());

    let mut client = Client::connect(EngineConfig::new())?;
    let controller = client.new_thread().await?;
    controller.invoke(message).await?;

    loop {
        match controller.step().await {
            StepOutcome::Applied(StreamEvent::NodeStarted { node, fields, .. }) => {
                println!("[{node}]");
                if let Some(plan) = fields.plan {
                    println!("plan: {plan}");
                }
            }
            StepOutcome::Applied(event) => println!("{}", event.name()),
            StepOutcome::Dropped(_) => {}
            StepOutcome::Aborted(err) => return Err(err.into()),
            StepOutcome::Idle => break,
        }
    }

    if let Some(call) = controller.gate().pending().cloned() {
        println!("approving {} {:?}", call.name, call.args);
        controller.decide(true).await?;
        controller.drive().await?;
    }

    let view = controller.store().snapshot();
    println!("settled {} with {} messages", view.run.state, view.messages.len());
    Ok(())
}
