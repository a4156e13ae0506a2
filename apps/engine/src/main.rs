use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alert_cell::{
    AlertDispatcher, AlertPriority, ChannelAdapter, DispatchPolicy, LoggingChannel, MessageTemplates, RoutingTable,
    WebhookChannel,
};
use appointment_cell::{AppointmentBookingService, BookingPolicy};
use doctor_cell::{CalendarStore, Doctor};
use shared_config::AppConfig;
use shared_models::Channel;

#[tokio::main]
async fn main() -> Result<()> {
    // Loading Env Vars
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling engine");

    let config = AppConfig::from_env();

    let calendar = Arc::new(CalendarStore::new());
    for doctor in load_doctors(&config)? {
        calendar.register_doctor(doctor).await?;
    }

    let dispatcher = Arc::new(build_dispatcher(&config));
    dispatcher.start().await?;

    let engine = AppointmentBookingService::new(
        Arc::clone(&calendar),
        Arc::clone(&dispatcher),
        BookingPolicy::from(&config),
    );
    info!(
        doctors = engine.calendar().list_doctors(None).await.len(),
        "Engine ready, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;

    info!("Shutting down alert dispatcher");
    dispatcher.shutdown().await;
    Ok(())
}

fn load_doctors(config: &AppConfig) -> Result<Vec<Doctor>> {
    let Some(path) = &config.doctors_file else {
        warn!("CLINIC_DOCTORS_FILE not set, starting with no doctors");
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read doctors file {}", path))?;
    let doctors: Vec<Doctor> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid doctors file {}", path))?;

    info!("Loaded {} doctors from {}", doctors.len(), path);
    Ok(doctors)
}

fn build_dispatcher(config: &AppConfig) -> AlertDispatcher {
    let mut routing = RoutingTable::default();
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
        Arc::new(LoggingChannel::new(Channel::Email)),
        Arc::new(LoggingChannel::new(Channel::Messaging)),
        Arc::new(LoggingChannel::new(Channel::Voice)),
    ];

    if let Some(url) = &config.workflow_webhook_url {
        info!("Workflow webhook enabled for high priority alerts");
        adapters.push(Arc::new(WebhookChannel::new(url.clone())));
        routing = routing.with_channel_from(Channel::Webhook, AlertPriority::High);
    }

    AlertDispatcher::new(
        DispatchPolicy::from(config),
        routing,
        MessageTemplates::new(config.hospital_name.clone()),
        adapters,
    )
}
