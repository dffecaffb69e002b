mod agents;
mod ai;
mod approval;
mod budget;
mod config;
mod db;
mod events;
mod executor;
mod intent;
mod models;
mod orchestrator;
mod policy;
mod web;

use std::env;
use std::sync::Arc;

use dotenv::dotenv;

use crate::agents::create_default_registry;
use crate::approval::ApprovalService;
use crate::config::Config;
use crate::db::Database;
use crate::events::EventBroadcaster;
use crate::executor::TaskExecutor;
use crate::intent::LlmIntentClassifier;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Arc::new(Config::from_env());
    let db = match Database::new(&config.database_url) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("[MAIN] Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(create_default_registry(&config));
    let broadcaster = Arc::new(EventBroadcaster::new());
    let classifier = Arc::new(LlmIntentClassifier::new(&config));

    let executor = Arc::new(TaskExecutor::new(
        db.clone(),
        config.clone(),
        registry,
        broadcaster.clone(),
        classifier,
    ));
    let orchestrator = Orchestrator::new(executor.clone());
    let approvals = ApprovalService::new(executor);

    let user = env::var("NEXUS_USER").unwrap_or_else(|_| "local".to_string());
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("Usage: nexus-backend <message>");
        eprintln!("       nexus-backend approve <task-id>");
        eprintln!("       nexus-backend reject <task-id> [reason]");
        eprintln!("       nexus-backend budget");
        std::process::exit(2);
    }

    // mirror every event for this user to the log while the run lasts
    let (_subscription, mut events) = broadcaster.subscribe(&user);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log::info!("[EVENT] {} {}", event.event_type, event.data);
        }
    });

    let outcome = match args[0].as_str() {
        "budget" => budget::get_spending_summary(&db, &config, &user),
        "approve" if args.len() >= 2 => approvals
            .approve_task(&args[1], &user)
            .await
            .map(|task| serde_json::to_value(&task).unwrap_or_default()),
        "reject" if args.len() >= 2 => approvals
            .reject_task(&args[1], &user, args.get(2).map(String::as_str))
            .map(|task| serde_json::to_value(&task).unwrap_or_default()),
        _ => {
            let message = args.join(" ");
            orchestrator.orchestrate(&message, &user).await
        }
    };

    match outcome {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                log::error!("[MAIN] Failed to render outcome: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            log::error!("[MAIN] {}", e);
            std::process::exit(1);
        }
    }
}
