//! Consilium — interactive multi-agent orchestration runtime.

use std::io::{self, Write};

use consilium::config::RuntimeConfig;
use consilium::kb::KBStore;
use consilium::Runtime;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    println!("\n{}", "=".repeat(60));
    println!("Consilium — multi-agent orchestration runtime");
    println!("{}", "=".repeat(60));

    let config = RuntimeConfig::from_env();
    let kb = KBStore::load(&[]);
    let runtime = Runtime::new(config, kb, "./logs");

    let status = runtime.status();
    info!("startup status: {:?}", status.llm_circuit_state);
    println!("Director mode: {:?}", status.director_mode);
    println!("KB version: {}\n", status.kb.version_hash);

    println!("Commands: 'quit' | 'status'\n");

    loop {
        print!("task> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let query = input.trim();

        if query.is_empty() {
            continue;
        }

        match query.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("\nGoodbye.\n");
                break;
            }
            "status" => {
                let status = runtime.status();
                println!("{}\n", serde_json::to_string_pretty(&status)?);
                continue;
            }
            _ => {}
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let (result, _record) = runtime.run_task(&task_id, query, true, &today).await;
        println!("\n{}\n", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
