use std::{sync::Weak, time::Duration};

use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle, JoinSet},
    time::{MissedTickBehavior, interval},
};

use crate::{NodeHandler, node::Node};

/// How often the configured static contacts are greeted.
pub const STATIC_CONTACT_PERIOD: Duration = Duration::from_secs(30);

/// How often dynamic contacts are requested from known peers.
pub const DYNAMIC_CONTACT_PERIOD: Duration = Duration::from_secs(45);

/// Spawn both contact loops.
///
/// Each loop runs until the shutdown signal fires or the node is dropped;
/// cancellation is terminal. Per-tick work goes into a join set owned by the
/// loop, so stopping a loop also stops its in-flight contacts.
pub(crate) fn spawn<H: NodeHandler>(
    node: Weak<Node<H>>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(static_loop(node.clone(), shutdown.clone())),
        tokio::spawn(dynamic_loop(node, shutdown)),
    ]
}

/// Handle one finished join set task.
///
/// Panics are propagated; cancellation only happens during shutdown and is
/// not an error.
pub(crate) fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        } else if !e.is_cancelled() {
            log::error!("contact task failed: err={}", e);
        }
    }
}

/// Greet every configured static contact once per period.
async fn static_loop<H: NodeHandler>(node: Weak<Node<H>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(STATIC_CONTACT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(node) = node.upgrade() else {
                    break;
                };

                for endpoint in node.config().contacts.clone() {
                    let node = node.clone();
                    tasks.spawn(async move {
                        node.contact_endpoint(&endpoint).await;
                    });
                }
            }
            Some(result) = tasks.join_next() => reap(result),
            _ = shutdown.changed() => break,
        }
    }

    tasks.shutdown().await;
    log::debug!("static contact loop stopped");
}

/// Ask all known peers for the dynamic contacts once per period.
async fn dynamic_loop<H: NodeHandler>(node: Weak<Node<H>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(DYNAMIC_CONTACT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(node) = node.upgrade() else {
                    break;
                };

                tasks.spawn(async move {
                    node.request_dynamic_contacts().await;
                });
            }
            Some(result) = tasks.join_next() => reap(result),
            _ = shutdown.changed() => break,
        }
    }

    tasks.shutdown().await;
    log::debug!("dynamic contact loop stopped");
}
