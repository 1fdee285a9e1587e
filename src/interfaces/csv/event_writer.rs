use crate::domain::event::DefaultEvent;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct EventRow<'a> {
    id: u64,
    loan_id: &'a str,
    event_type: &'static str,
    days_overdue: u32,
    outstanding_amount: String,
    outstanding_late_fees: String,
    message_id: &'a str,
    processed_at: String,
    note: &'a str,
}

/// Writes the default event log as CSV, one row per event.
pub struct EventWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes all events ordered by id and flushes the sink.
    pub fn write_events(&mut self, mut events: Vec<DefaultEvent>) -> Result<()> {
        events.sort_by_key(|e| e.id);
        for event in &events {
            self.writer.serialize(EventRow {
                id: event.id,
                loan_id: &event.loan_id,
                event_type: event.event_type.as_str(),
                days_overdue: event.days_overdue,
                outstanding_amount: event.outstanding_amount.to_string(),
                outstanding_late_fees: event.outstanding_late_fees.to_string(),
                message_id: event.message_id.as_deref().unwrap_or(""),
                processed_at: event.processed_at.to_rfc3339(),
                note: &event.note,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
