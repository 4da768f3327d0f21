//! Best-effort backup fan-out.
//!
//! After a primary applied a write it forwards the same request, flagged as a
//! backup write, to its backup superpeers. Individual failures are logged and
//! counted but never fail the write: the stabilization loop repairs missing
//! backups later.

use corelib::NodeId;
use protocol::{Message, Transport};
use tracing::{trace, warn};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: Vec<NodeId>,
    pub failed: Vec<NodeId>,
}

impl FanOutReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Forward `msg` as a backup write to every target except the local node.
///
/// Messages that have no backup form are not sent and yield an empty report.
pub fn fan_out(transport: &dyn Transport, targets: &[NodeId], msg: &Message) -> FanOutReport {
    let mut report = FanOutReport::default();
    let backup = match msg.to_backup() {
        Some(backup) => backup,
        None => return report,
    };
    let me = transport.local_node();

    for &target in targets.iter().filter(|t| **t != me) {
        match transport.send(target, backup.clone()) {
            Ok(_) => {
                trace!(target = %target, msg = msg.name(), "backup write delivered");
                report.delivered.push(target);
            }
            Err(e) => {
                warn!(target = %target, msg = msg.name(), error = %e, "backup write failed");
                metrics::counter!("lookup_backup_fanout_failures_total", "msg" => msg.name()).increment(1);
                report.failed.push(target);
            }
        }
    }
    report
}
