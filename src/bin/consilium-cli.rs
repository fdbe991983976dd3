//! Ambient operator CLI — SPEC_FULL.md §10. Reads one task from `argv` (or
//! stdin if no argument is given), runs it through the full pipeline, and
//! prints the result as pretty JSON. No web gateway; this is a
//! process-local tool only.

use std::io::{self, Read};

use consilium::config::RuntimeConfig;
use consilium::kb::KBStore;
use consilium::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let task = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf.trim().to_string()
        }
    };

    if task.is_empty() {
        eprintln!("usage: consilium-cli <task> (or pipe task text via stdin)");
        std::process::exit(2);
    }

    let config = RuntimeConfig::from_env();
    let kb = KBStore::load(&[]);
    let runtime = Runtime::new(config, kb, "./logs");

    let task_id = uuid::Uuid::new_v4().to_string();
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let (result, _record) = runtime.run_task(&task_id, &task, true, &today).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
