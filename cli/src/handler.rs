//! The CLI's batch handler: one record per decoded event.

use async_trait::async_trait;
use chainingest_core::{BatchContext, BatchHandler, DecodedEvent, IngestError, RecordSink};
use chainingest_evm::AbiEvent;
use serde_json::{json, Value};

/// Persists every event as a record in collection `rule`, keyed
/// `tx_hash:log_index`, so a redelivered batch overwrites its own rows.
#[derive(Debug, Default)]
pub struct RecordHandler;

impl RecordHandler {
    fn record(ctx: &BatchContext, event: &DecodedEvent<AbiEvent>) -> Value {
        json!({
            "block_number": event.block.number,
            "block_hash": event.block.hash,
            "timestamp": ctx.block(event.block.number).map(|h| h.timestamp),
            "tx_hash": event.tx_hash,
            "log_index": event.log_index,
            "address": event.address,
            "event": event.payload.event,
            "fields": event.payload.to_json(),
        })
    }
}

#[async_trait]
impl BatchHandler<AbiEvent> for RecordHandler {
    fn name(&self) -> &str {
        "records"
    }

    async fn handle(
        &self,
        ctx: &BatchContext,
        events: &[DecodedEvent<AbiEvent>],
        sink: &mut dyn RecordSink,
    ) -> Result<(), IngestError> {
        for event in events {
            sink.put_record(&event.rule, &event.log_key(), Self::record(ctx, event))
                .await?;
        }
        tracing::debug!(range = %ctx.range, events = events.len(), "records written");
        Ok(())
    }
}
