//! `labgate status` and `labgate templates`

use anyhow::{Context, Result};

use labgate::config::Config;
use labgate::gateway::{templates_for, CATEGORIES};
use labgate::runtime::{available_runtimes, create_runtime, docker_status, kafka_clusters};

/// Show engine status and Kafka clusters through the configured runtime.
pub(crate) async fn cmd_status(config: &Config) -> Result<()> {
    let runtime =
        create_runtime(&config.runtime).with_context(|| "Failed to set up container runtime")?;

    println!("labgate v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Runtime:   {}", runtime.name());
    let available = available_runtimes(&config.runtime).await;
    println!(
        "Available: {}",
        if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        }
    );
    println!();

    let status = docker_status(runtime.as_ref()).await;
    if !status.running {
        println!("Docker:    not running");
        if let Some(error) = &status.error {
            println!("           {}", error);
        }
        return Ok(());
    }

    println!(
        "Docker:    running (version {})",
        status.version.as_deref().unwrap_or("unknown")
    );
    println!("Containers: {}", status.containers.unwrap_or(0));
    for container in status.container_details.iter().flatten() {
        println!("  {:<32} {:<12} {}", container.name, container.state, container.image);
    }

    let clusters = kafka_clusters(runtime.as_ref()).await;
    println!();
    println!("Kafka clusters: {}", clusters.len());
    for cluster in &clusters {
        println!("  {}", cluster.name);
        for member in &cluster.containers {
            println!("    {:<30} {:<20} {}", member.name, member.status, member.ports.join(", "));
        }
    }
    Ok(())
}

/// Print the templates of `category` as JSON.
pub(crate) fn cmd_templates(category: &str) -> Result<()> {
    if !CATEGORIES.contains(&category) {
        eprintln!(
            "Unknown category '{}' (expected one of: {})",
            category,
            CATEGORIES.join(", ")
        );
    }
    println!("{}", serde_json::to_string_pretty(templates_for(category))?);
    Ok(())
}
