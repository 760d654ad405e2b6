//! NATS intake for clearing instructions
//!
//! Mirrors the HTTP intake: messages on the instruction subject carry
//! the same JSON body as `POST /api/v1/instructions`. Rejected messages
//! are republished to the failed subject with the error attached so an
//! operator queue can pick them up.

use clearing_core::{ClearingEngine, RegisterInstruction};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Subject carrying instruction registrations
pub const INSTRUCTION_SUBJECT: &str = "clearing.instructions";

/// Subject receiving rejected registrations
pub const FAILED_SUBJECT: &str = "clearing.instructions.failed";

#[derive(Debug, Serialize)]
struct RejectedInstruction<'a> {
    code: &'a str,
    message: String,
    payload: String,
}

/// Consume instruction messages until the subscription ends
pub async fn run(client: async_nats::Client, engine: Arc<ClearingEngine>) -> anyhow::Result<()> {
    let mut subscriber = client.subscribe(INSTRUCTION_SUBJECT).await?;
    info!("Subscribed to {}", INSTRUCTION_SUBJECT);

    while let Some(message) = subscriber.next().await {
        let payload = String::from_utf8_lossy(&message.payload).to_string();

        let request: RegisterInstruction = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed instruction message: {}", e);
                publish_rejection(&client, "MALFORMED_MESSAGE", e.to_string(), payload).await;
                continue;
            }
        };

        match engine.register_instruction(request).await {
            Ok(instruction) => {
                info!(
                    "Registered instruction {} from queue",
                    instruction.instruction_id
                );
            }
            Err(e) => {
                error!("Queue registration rejected: {}", e);
                publish_rejection(&client, e.code(), e.to_string(), payload).await;
            }
        }
    }

    Ok(())
}

async fn publish_rejection(
    client: &async_nats::Client,
    code: &str,
    message: String,
    payload: String,
) {
    let rejection = RejectedInstruction {
        code,
        message,
        payload,
    };

    let body = match serde_json::to_vec(&rejection) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize rejection: {}", e);
            return;
        }
    };

    if let Err(e) = client.publish(FAILED_SUBJECT, body.into()).await {
        error!("Failed to publish rejection to {}: {}", FAILED_SUBJECT, e);
    }
}
