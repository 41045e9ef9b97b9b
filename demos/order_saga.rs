//! Runs the order saga against a file-backed transaction log.
//!
//! ```text
//! RUST_LOG=choreo_es=debug cargo run --example order_saga -- ./saga-data 5
//! ```

use std::sync::Arc;
use std::time::Duration;

use choreo_es::api::Backstage;
use choreo_es::domain::{CreateOrder, order_system};
use choreo_es::pagination::PageRequest;
use choreo_es::{FileRecorder, Recorder, RunnerContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let dir = args.next().unwrap_or_else(|| "saga-data".to_string());
    let count: usize = args.next().map(|n| n.parse()).transpose()?.unwrap_or(3);

    let recorder: Arc<dyn Recorder> = Arc::new(FileRecorder::open(&dir)?);
    let context = RunnerContext::new();
    let runner = context.init(order_system().recorder(recorder)).await?;
    let api = Backstage::new(Arc::clone(&runner));

    let mut commands = Vec::new();
    for _ in 0..count {
        commands.push(api.submit_command().await?);
    }

    let repository = runner.repository("commands")?;
    for id in &commands {
        loop {
            if repository.get::<CreateOrder>(*id)?.state().done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        println!("command {id} done");
    }

    let page = api.notifications(&[], &PageRequest::first(10))?;
    println!("latest notifications:");
    for n in page.nodes() {
        println!(
            "  {:<13} #{:<3} {:<28} {}",
            n.application_name, n.position, n.event.topic, n.event.originator_id
        );
    }

    context.close().await?;
    Ok(())
}
