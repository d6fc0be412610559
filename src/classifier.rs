//! Backend status classification
//!
//! Both backends report their own vocabulary. [`classify`] maps each status onto a
//! [`Classification`] and [`TerminalOutcome::apply`] writes the effect onto the item, so
//! completion handling does not care which backend ran.

use crate::backend::{BackendStatus, EventData, ManifestStatus, SimpleStatus};
use crate::item::CatalogItem;
use crate::types::OutcomeCode;
use chrono::{DateTime, Utc};

/// How a terminal status affects the item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Output written (32)
    Completed,
    /// Output was already present (32)
    AlreadyExists,
    /// Stopped by the user (30, user-abort flag)
    UserStopped,
    /// Failed with this code
    Failed(OutcomeCode),
    /// Stopped after too many packet faults; code left as is
    PacketFault,
}

/// Whether a status ends the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The run continues
    Running,
    /// The run is over
    Terminal(TerminalOutcome),
}

impl Classification {
    /// Whether the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, Classification::Terminal(_))
    }
}

/// Classify one backend status
pub fn classify(status: &BackendStatus) -> Classification {
    use Classification::{Running, Terminal};
    match status {
        BackendStatus::Manifest(status) => match status {
            ManifestStatus::Ready | ManifestStatus::SegmentFail | ManifestStatus::Downloading => Running,
            ManifestStatus::Completed => Terminal(TerminalOutcome::Completed),
            ManifestStatus::ExistOutputFilepath => Terminal(TerminalOutcome::AlreadyExists),
            ManifestStatus::UserStop => Terminal(TerminalOutcome::UserStopped),
            ManifestStatus::Error => Terminal(TerminalOutcome::Failed(OutcomeCode::DownloadError)),
        },
        BackendStatus::Simple(status) => match status {
            SimpleStatus::Ready | SimpleStatus::Downloading => Running,
            SimpleStatus::Completed => Terminal(TerminalOutcome::Completed),
            SimpleStatus::UserStop => Terminal(TerminalOutcome::UserStopped),
            SimpleStatus::WrongUrl
            | SimpleStatus::WrongDirectory
            | SimpleStatus::Error
            | SimpleStatus::Exception => Terminal(TerminalOutcome::Failed(OutcomeCode::ToolStartError)),
            SimpleStatus::TimeOver => Terminal(TerminalOutcome::Failed(OutcomeCode::ToolTimeOver)),
            SimpleStatus::ForceStop => Terminal(TerminalOutcome::Failed(OutcomeCode::ForceStop)),
            SimpleStatus::HttpForbidden => Terminal(TerminalOutcome::Failed(OutcomeCode::HttpForbidden)),
            SimpleStatus::PfStop => Terminal(TerminalOutcome::PacketFault),
        },
        BackendStatus::Other(_) => Running,
    }
}

impl TerminalOutcome {
    /// Write this outcome onto the item
    pub fn apply(&self, item: &mut CatalogItem, data: &EventData, now: DateTime<Utc>) {
        match self {
            TerminalOutcome::Completed | TerminalOutcome::AlreadyExists => {
                item.completed = true;
                item.end_time = Some(now);
                item.download_time_secs = item
                    .start_time
                    .map(|start| now.signed_duration_since(start).num_seconds());
                if data.filesize.is_some() {
                    item.filesize = data.filesize;
                    item.filesize_str = data.filesize_str.clone();
                }
                if data.download_speed.is_some() {
                    item.download_speed = data.download_speed.clone();
                }
                item.outcome_code = OutcomeCode::Completed;
            }
            TerminalOutcome::UserStopped => {
                item.user_aborted = true;
                item.outcome_code = OutcomeCode::UserStop;
            }
            TerminalOutcome::Failed(code) => {
                item.completed = false;
                item.outcome_code = *code;
            }
            TerminalOutcome::PacketFault => {
                item.transient_fault = true;
                item.packet_faults = data.packet_faults.unwrap_or(item.packet_faults);
            }
        }
        if data.duration_secs.is_some() {
            item.duration_secs = data.duration_secs;
        }
    }

    /// Whether the item finished successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalOutcome::Completed | TerminalOutcome::AlreadyExists)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;

    fn terminal(status: BackendStatus) -> TerminalOutcome {
        match classify(&status) {
            Classification::Terminal(outcome) => outcome,
            Classification::Running => panic!("{status} should be terminal"),
        }
    }

    #[test]
    fn manifest_vocabulary() {
        for running in [
            ManifestStatus::Ready,
            ManifestStatus::SegmentFail,
            ManifestStatus::Downloading,
        ] {
            assert_eq!(
                classify(&BackendStatus::Manifest(running)),
                Classification::Running,
                "{} keeps the run alive",
                running.as_str()
            );
        }
        assert_eq!(
            terminal(BackendStatus::Manifest(ManifestStatus::Completed)),
            TerminalOutcome::Completed
        );
        assert_eq!(
            terminal(BackendStatus::Manifest(ManifestStatus::ExistOutputFilepath)),
            TerminalOutcome::AlreadyExists
        );
        assert_eq!(
            terminal(BackendStatus::Manifest(ManifestStatus::Error)),
            TerminalOutcome::Failed(OutcomeCode::DownloadError)
        );
    }

    #[test]
    fn simple_vocabulary() {
        let cases = [
            (SimpleStatus::WrongUrl, TerminalOutcome::Failed(OutcomeCode::ToolStartError)),
            (SimpleStatus::WrongDirectory, TerminalOutcome::Failed(OutcomeCode::ToolStartError)),
            (SimpleStatus::Exception, TerminalOutcome::Failed(OutcomeCode::ToolStartError)),
            (SimpleStatus::Error, TerminalOutcome::Failed(OutcomeCode::ToolStartError)),
            (SimpleStatus::TimeOver, TerminalOutcome::Failed(OutcomeCode::ToolTimeOver)),
            (SimpleStatus::ForceStop, TerminalOutcome::Failed(OutcomeCode::ForceStop)),
            (SimpleStatus::HttpForbidden, TerminalOutcome::Failed(OutcomeCode::HttpForbidden)),
            (SimpleStatus::UserStop, TerminalOutcome::UserStopped),
            (SimpleStatus::PfStop, TerminalOutcome::PacketFault),
            (SimpleStatus::Completed, TerminalOutcome::Completed),
        ];
        for (status, expected) in cases {
            assert_eq!(terminal(BackendStatus::Simple(status)), expected, "{}", status.as_str());
        }
        assert_eq!(
            classify(&BackendStatus::Other("BUFFERING".into())),
            Classification::Running,
            "unknown statuses keep the run alive"
        );
    }

    #[test]
    fn completion_records_size_and_time() {
        let now = Utc::now();
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        item.outcome_code = OutcomeCode::Downloading;
        item.start_time = Some(now - chrono::Duration::seconds(90));
        let data = EventData {
            filesize: Some(2048),
            filesize_str: Some("2.00 KB".into()),
            download_speed: Some("22 B/s".into()),
            duration_secs: Some(3600),
            ..Default::default()
        };

        TerminalOutcome::Completed.apply(&mut item, &data, now);

        assert!(item.completed);
        assert_eq!(item.outcome_code, OutcomeCode::Completed);
        assert_eq!(item.download_time_secs, Some(90));
        assert_eq!(item.filesize, Some(2048));
        assert_eq!(item.duration_secs, Some(3600));
    }

    #[test]
    fn user_stop_and_packet_fault_effects() {
        let now = Utc::now();
        let mut item = CatalogItem::new(Origin::Recent, "C1");
        item.outcome_code = OutcomeCode::Downloading;

        TerminalOutcome::PacketFault.apply(
            &mut item,
            &EventData {
                packet_faults: Some(21),
                ..Default::default()
            },
            now,
        );
        assert!(item.transient_fault);
        assert_eq!(item.packet_faults, 21);
        assert_eq!(item.outcome_code, OutcomeCode::Downloading, "packet faults leave the code alone");

        TerminalOutcome::UserStopped.apply(&mut item, &EventData::default(), now);
        assert!(item.user_aborted);
        assert_eq!(item.outcome_code, OutcomeCode::UserStop);
    }
}
