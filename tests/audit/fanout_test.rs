//! Tests for `FanoutAudit`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use turnstile::audit::{AuditSink, FanoutAudit};
use turnstile::gate::AccessDecisionRecord;

use crate::denial;

#[derive(Default)]
struct Counting {
    appended: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl AuditSink for Counting {
    async fn append(&self, _record: &AccessDecisionRecord) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("sink offline");
        }
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn every_sink_sees_every_record() {
    let a = Arc::new(Counting::default());
    let b = Arc::new(Counting::default());
    let fanout = FanoutAudit::new(vec![
        Arc::clone(&a) as Arc<dyn AuditSink>,
        Arc::clone(&b) as Arc<dyn AuditSink>,
    ]);

    fanout.append(&denial("x", 1)).await.expect("append");
    fanout.append(&denial("y", 2)).await.expect("append");

    assert_eq!(a.appended.load(Ordering::SeqCst), 2);
    assert_eq!(b.appended.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_sink_does_not_starve_the_rest() {
    let broken = Arc::new(Counting {
        fail: true,
        ..Counting::default()
    });
    let healthy = Arc::new(Counting::default());
    let fanout = FanoutAudit::new(vec![
        Arc::clone(&broken) as Arc<dyn AuditSink>,
        Arc::clone(&healthy) as Arc<dyn AuditSink>,
    ]);

    let err = fanout.append(&denial("x", 1)).await.expect_err("first sink fails");
    assert!(err.to_string().contains("sink offline"));
    assert_eq!(healthy.appended.load(Ordering::SeqCst), 1);
}
