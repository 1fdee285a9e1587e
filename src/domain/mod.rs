//! Domain model of the default lifecycle: loans and their installments,
//! audit records, settings, notices and the ports the processor talks to.

pub mod calendar;
pub mod event;
pub mod lifecycle;
pub mod loan;
pub mod money;
pub mod notice;
pub mod ports;
pub mod settings;
