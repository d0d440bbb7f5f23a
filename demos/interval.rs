use carrotq::prelude::*;
use std::sync::Arc;

struct Heartbeat;

#[async_trait]
impl TaskHandler for Heartbeat {
    async fn run(&self, invocation: &Invocation) -> Result<String, TaskFailure> {
        let service = invocation
            .kwargs
            .get("service")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown");
        tracing::info!("heartbeat from {}", service);
        Ok(format!("{service} alive"))
    }
}

#[tokio::main]
async fn main() -> CarrotResult<()> {
    let config = CarrotConfig::development();
    config.logging.init();

    let carrot = Carrot::new(config)?;
    carrot.register_task("demo.heartbeat", Arc::new(Heartbeat)).await;
    carrot
        .register_fn("demo.divide", |invocation: Invocation| async move {
            let numbers: Vec<i64> = invocation
                .args
                .iter()
                .filter_map(|arg| arg.as_str()?.parse().ok())
                .collect();
            match numbers.as_slice() {
                [_, 0] => Err(TaskFailure::new("ZeroDivisionError: division by zero")),
                [a, b] => Ok((a / b).to_string()),
                _ => Err(TaskFailure::new("expected two integer arguments")),
            }
        })
        .await;

    carrot
        .schedule(
            ScheduledTaskDefinition::every(5, IntervalUnit::Seconds, "demo.heartbeat")
                .with_routing(Routing::queue("default"))
                .with_kwargs(r#"{"service": "billing"}"#),
        )
        .await?;
    carrot
        .schedule(
            ScheduledTaskDefinition::every(10, IntervalUnit::Seconds, "demo.divide")
                .with_routing(Routing::queue("default"))
                .with_args("10, 0"),
        )
        .await?;

    carrot.start().await?;

    println!("🥕 Carrot is running! Press Ctrl+C to stop...");

    carrot.wait_for_shutdown().await?;

    for record in carrot.list(&RecordFilter::all()).await? {
        println!(
            "{:<16} {:<18} {}",
            record.invocation.task,
            record.status.label(),
            record.display_completion_time().or(record.display_failure_time()).unwrap_or_default()
        );
    }
    Ok(())
}
