use crate::output;
use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use colored::Colorize;
use dm_core::config::load_config;
use dm_core::egress::{EgressOperationStore, EgressProviderRegistry, InMemorySinkClients};
use dm_core::rules::actions::ActionRegistry;
use dm_core::rules::{validate_rule, CollectionRuleService};
use dm_core::target::SimulatedTarget;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Process id reported by the simulated target
    #[arg(long, default_value_t = std::process::id())]
    pub pid: u32,

    /// Process name reported by the simulated target
    #[arg(long, default_value = "simulated")]
    pub name: String,

    /// Manual rules to trigger once after startup
    #[arg(long = "trigger", value_name = "RULE")]
    pub triggers: Vec<String>,

    /// Finish every rule after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

pub async fn validate(root: &Path) -> Result<()> {
    let config = load_config(root).await?;
    let registry =
        EgressProviderRegistry::from_config(&config.global.egress, &InMemorySinkClients::new());
    let actions = ActionRegistry::with_defaults();

    let mut invalid = 0;
    for rule in &config.rules {
        match validate_rule(rule, &actions, &registry) {
            Ok(()) => println!("{} {}", "✓".green(), rule.name),
            Err(errors) => {
                invalid += 1;
                println!("{} {}", "✗".red(), rule.name.bold());
                for error in errors {
                    println!("    {error}");
                }
            }
        }
    }

    if invalid > 0 {
        return Err(eyre!(
            "{invalid} of {} collection rules are invalid",
            config.rules.len()
        ));
    }
    println!("{} collection rules are valid", config.rules.len());
    Ok(())
}

pub async fn providers(root: &Path) -> Result<()> {
    let config = load_config(root).await?;
    let registry =
        EgressProviderRegistry::from_config(&config.global.egress, &InMemorySinkClients::new());

    let names = registry.names();
    if names.is_empty() {
        println!("{}", "No egress providers are configured".dimmed());
    }
    for (name, kind) in names {
        println!("{:<24} {}", name.bold(), kind.dimmed());
    }
    Ok(())
}

pub async fn run(root: &Path, args: RunArgs) -> Result<()> {
    let config = load_config(root).await?;
    let registry = Arc::new(EgressProviderRegistry::from_config(
        &config.global.egress,
        &InMemorySinkClients::new(),
    ));
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let store = EgressOperationStore::from_config(&config.global, registry).with_events(events_tx.clone());
    let target = Arc::new(SimulatedTarget::with_pid(args.pid, &args.name));
    let service = Arc::new(
        CollectionRuleService::new(
            Arc::new(ActionRegistry::with_defaults()),
            store.clone(),
            target,
        )
        .with_policy(config.global.rules.outcome_transition)
        .with_events(events_tx),
    );

    let done = CancellationToken::new();
    let printer = {
        let done = done.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events_rx.recv() => match event {
                        Some(event) => output::print_event(&event),
                        None => break,
                    },
                    () = done.cancelled() => {
                        while let Ok(event) = events_rx.try_recv() {
                            output::print_event(&event);
                        }
                        break;
                    }
                }
            }
        })
    };

    let invalid = service.start(config.rules);
    for rule in &invalid {
        output::print_invalid(rule);
    }
    for name in &args.triggers {
        service.trigger(name)?;
    }

    let stopper = {
        let service = Arc::clone(&service);
        let timeout = args.timeout_secs.map(Duration::from_secs);
        tokio::spawn(async move {
            match timeout {
                Some(timeout) => tokio::select! {
                    () = tokio::time::sleep(timeout) => tracing::info!("run timed out"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
                },
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("interrupted");
                }
            }
            service.cancel();
        })
    };

    service.join().await;
    stopper.abort();
    done.cancel();
    let _ = printer.await;

    output::print_rules(&service.describe_rules());
    let operations = store.get_operations(None, None);
    println!("{}", serde_json::to_string_pretty(&operations)?);
    store.shutdown();

    if !invalid.is_empty() {
        return Err(eyre!("{} collection rules were not started", invalid.len()));
    }
    Ok(())
}
