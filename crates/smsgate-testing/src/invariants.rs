//! Invariant checks over persisted callback rows.
//!
//! Every accepted request must leave exactly one audit row and one message
//! row behind, written together. These checks read the tables back and
//! fail loudly when the pairing is broken.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};

use crate::{AuditRow, MessageRow, TestEnv};

/// Dual-write invariants that must hold after any sequence of requests.
pub struct Invariants;

impl Invariants {
    /// Pairing: both tables hold the same number of rows, with matching
    /// arrival times.
    pub fn rows_are_paired(audits: &[AuditRow], messages: &[MessageRow]) -> Result<()> {
        ensure!(
            audits.len() == messages.len(),
            "audit_log has {} rows but messages has {}",
            audits.len(),
            messages.len()
        );

        let audit_times = histogram(audits.iter().map(|row| row.received_on));
        let message_times = histogram(messages.iter().map(|row| row.received_on));
        ensure!(
            audit_times == message_times,
            "arrival times differ between tables: {audit_times:?} != {message_times:?}"
        );

        Ok(())
    }

    /// Audit completeness: every snapshot parses and agrees with its row.
    pub fn audit_snapshots_match(audits: &[AuditRow]) -> Result<()> {
        for row in audits {
            let snapshot = row.raw_request_json()?;

            ensure!(
                snapshot["signature"] == row.signature.as_str(),
                "snapshot signature differs from column for {}",
                row.message_sid
            );
            ensure!(
                snapshot["is_authentic"] == row.is_authentic.as_bool(),
                "snapshot verdict differs from column for {}",
                row.message_sid
            );
            ensure!(
                snapshot["received_on"] == row.received_on,
                "snapshot arrival time differs from column for {}",
                row.message_sid
            );
        }
        Ok(())
    }

    /// Replay visibility: the audit log holds `expected` rows for a message
    /// identifier, never collapsed into one.
    pub fn replays_recorded(audits: &[AuditRow], message_sid: &str, expected: usize) -> Result<()> {
        let recorded = audits.iter().filter(|row| row.message_sid == message_sid).count();
        ensure!(
            recorded == expected,
            "expected {expected} audit rows for {message_sid}, found {recorded}"
        );
        Ok(())
    }

    /// Runs every table-wide check against the environment's database.
    pub async fn check_all(env: &TestEnv) -> Result<()> {
        let audits = env.audit_rows().await?;
        let messages = env.message_rows().await?;

        Self::rows_are_paired(&audits, &messages)?;
        Self::audit_snapshots_match(&audits)?;
        Ok(())
    }
}

fn histogram(values: impl Iterator<Item = i64>) -> BTreeMap<i64, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}
