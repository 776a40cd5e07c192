//! Environment-level behavior: named mboxes, mutable delivery rules,
//! stop guards and run-time stats.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentry::prelude::*;
use agentry::{DeliveryError, EnvError, Layer, MboxNamespace, Quantity, StopGuard};

#[derive(Debug)]
struct Probe {
    value: u32,
}

#[derive(Debug)]
struct Finish;

struct Sink {
    so: AgentBase,
    shared: MboxRef,
    seen: Arc<AtomicUsize>,
}

impl Agent for Sink {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        let shared = Arc::clone(&self.shared);
        self.so_subscribe(&shared)
            .event(|agent: &mut Self, _msg: &Probe| {
                agent.seen.fetch_add(1, Ordering::SeqCst);
            })?;
        self.so_subscribe_self()
            .event(|agent: &mut Self, _msg: &Finish| {
                agent.so_base().so_environment().stop();
            })?;
        Ok(())
    }
}

#[test]
fn named_mboxes_resolve_by_identity() {
    Environment::launch(EnvParams::new(), |env| {
        let a = env.create_named_mbox("alpha");
        let b = env.create_named_mbox("alpha");
        assert_eq!(a.id(), b.id());

        let scoped = env.introduce_named_mbox(MboxNamespace::scoped("layer", "alpha"), |env| {
            env.create_mbox()
        });
        assert_ne!(scoped.id(), a.id());
        assert_eq!(env.named_mbox_count(), 2);

        // Dropping one of two references keeps the entry alive.
        drop(a);
        let c = env.create_named_mbox("alpha");
        assert_eq!(b.id(), c.id());

        // Dropping the last reference unregisters the name.
        let old_id = b.id();
        drop(b);
        drop(c);
        let fresh = env.create_named_mbox("alpha");
        assert_ne!(fresh.id(), old_id);

        env.stop();
        Ok(())
    })
    .unwrap();
}

#[derive(Debug)]
struct Counter {
    hits: u32,
}

struct MutableConsumer {
    so: AgentBase,
    shared: MboxRef,
    total: Arc<AtomicUsize>,
}

impl Agent for MutableConsumer {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        let shared = Arc::clone(&self.shared);
        self.so_subscribe(&shared)
            .event_mutable(|agent: &mut Self, msg: &mut Counter| {
                msg.hits += 1;
                agent.total.fetch_add(msg.hits as usize, Ordering::SeqCst);
            })?;
        self.so_subscribe_self()
            .event(|agent: &mut Self, _msg: &Finish| {
                agent.so_base().so_environment().stop();
            })?;
        Ok(())
    }
}

/// A mutable message reaches a single subscriber with exclusive access;
/// with two accepting subscribers the send fails and nobody gets it.
#[test]
fn mutable_messages_require_a_single_consumer() {
    let total = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&total);

    Environment::launch(EnvParams::new(), move |env| {
        let shared = env.create_mbox();

        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        let direct = base.so_direct_mbox();
        coop.add_agent(MutableConsumer {
            so: base,
            shared: Arc::clone(&shared),
            total: Arc::clone(&observed),
        });
        env.register_coop(coop)?;

        send_mutable(&shared, Counter { hits: 0 })?;
        std::thread::sleep(Duration::from_millis(100));

        // A second subscriber makes mutable delivery ambiguous.
        let mut second = env.make_coop();
        let base = second.new_agent_base();
        second.add_agent(MutableConsumer {
            so: base,
            shared: Arc::clone(&shared),
            total: Arc::new(AtomicUsize::new(0)),
        });
        env.register_coop(second)?;
        std::thread::sleep(Duration::from_millis(100));

        let result = send_mutable(&shared, Counter { hits: 0 });
        assert!(matches!(
            result,
            Err(DeliveryError::MutableMessageMultipleSubscribers { .. })
        ));

        send(&direct, Finish)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 1);
}

struct FlushGuard {
    notified: Arc<AtomicBool>,
}

impl StopGuard for FlushGuard {
    fn stop(&self) {
        self.notified.store(true, Ordering::SeqCst);
    }
}

/// `stop()` with a guard installed only notifies the guard; teardown
/// waits for the guard's removal.
#[test]
fn stop_guard_defers_shutdown() {
    let notified = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&notified);

    Environment::launch(EnvParams::new(), move |env| {
        let guard: Arc<dyn StopGuard> = Arc::new(FlushGuard {
            notified: Arc::clone(&observed),
        });
        env.setup_stop_guard(Arc::clone(&guard))?;

        env.stop();
        assert!(observed.load(Ordering::SeqCst), "guard must be notified");

        // Installing a guard after a stop request must fail.
        let late: Arc<dyn StopGuard> = Arc::new(FlushGuard {
            notified: Arc::new(AtomicBool::new(false)),
        });
        assert!(env.setup_stop_guard(late).is_err());

        // Removal releases the deferred stop; launch returns.
        env.remove_stop_guard(&guard);
        Ok(())
    })
    .unwrap();

    assert!(notified.load(Ordering::SeqCst));
}

/// Quantities flow to stats-mbox subscribers while the controller is
/// turned on.
#[test]
fn stats_controller_distributes_quantities() {
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);

    Environment::launch(
        EnvParams::new().stats_distribution_period(Duration::from_millis(30)),
        move |env| {
            let stats_mbox = env.stats_controller().mbox();

            struct StatsReader {
                so: AgentBase,
                stats_mbox: MboxRef,
                seen: Arc<AtomicUsize>,
            }
            impl Agent for StatsReader {
                fn so_base(&self) -> &AgentBase {
                    &self.so
                }
                fn so_base_mut(&mut self) -> &mut AgentBase {
                    &mut self.so
                }
                fn so_define_agent(&mut self) -> HandlerResult {
                    let mbox = Arc::clone(&self.stats_mbox);
                    self.so_subscribe(&mbox)
                        .event(|agent: &mut Self, quantity: &Quantity| {
                            if quantity.prefix == "coop_repository"
                                && quantity.suffix == "/agent.count"
                                && quantity.value == 1
                            {
                                agent.seen.fetch_add(1, Ordering::SeqCst);
                            }
                        })?;
                    self.so_subscribe_self()
                        .event(|agent: &mut Self, _msg: &Finish| {
                            agent.so_base().so_environment().stop();
                        })?;
                    Ok(())
                }
            }

            let mut coop = env.make_coop();
            let base = coop.new_agent_base();
            let direct = base.so_direct_mbox();
            coop.add_agent(StatsReader {
                so: base,
                stats_mbox,
                seen: Arc::clone(&observed),
            });
            env.register_coop(coop)?;

            env.stats_controller().turn_on();
            std::thread::sleep(Duration::from_millis(200));
            env.stats_controller().turn_off();

            send(&direct, Finish)?;
            Ok(())
        },
    )
    .unwrap();

    assert!(seen.load(Ordering::SeqCst) >= 2);
}

/// Delivery filters restrict what a subscriber sees; dropping the
/// filter restores full delivery.
#[test]
fn delivery_filters_gate_subscriptions() {
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);

    Environment::launch(EnvParams::new(), move |env| {
        let shared = env.create_mbox();
        let mut coop = env.make_coop();
        let mut base = coop.new_agent_base();
        base.set_delivery_filter::<Probe>(&shared, |p| p.value % 2 == 0)
            .unwrap();
        let direct = base.so_direct_mbox();
        coop.add_agent(Sink {
            so: base,
            shared: Arc::clone(&shared),
            seen: Arc::clone(&observed),
        });
        env.register_coop(coop)?;

        for value in 0..6 {
            send(&shared, Probe { value })?;
        }
        std::thread::sleep(Duration::from_millis(100));
        send(&direct, Finish)?;
        Ok(())
    })
    .unwrap();

    // Only 0, 2, 4 pass.
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}


// ---------------------------------------------------------------------
// User-installed layers

struct RecordingLayer {
    name: &'static str,
    fail: bool,
    log: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl Layer for RecordingLayer {
    fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err(format!("layer {} refused to start", self.name).into());
        }
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    fn stop(&self) {
        self.log.lock().push(format!("stop:{}", self.name));
    }
}

/// Layers are the first startup stage and the last shutdown stage, in
/// installation order up and reverse order down.
#[test]
fn layers_start_first_and_stop_last() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let params = EnvParams::new()
        .add_layer(Arc::new(RecordingLayer {
            name: "a",
            fail: false,
            log: Arc::clone(&log),
        }))
        .add_layer(Arc::new(RecordingLayer {
            name: "b",
            fail: false,
            log: Arc::clone(&log),
        }));

    let observed = Arc::clone(&log);
    Environment::launch(params, move |env| {
        observed.lock().push("init".to_string());
        env.stop();
        Ok(())
    })
    .unwrap();

    assert_eq!(
        *log.lock(),
        vec!["start:a", "start:b", "init", "stop:b", "stop:a"]
    );
}

/// A failing layer aborts the launch; layers started before it are
/// stopped again in reverse order and the init callback never runs.
#[test]
fn failing_layer_rolls_back_started_ones() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let params = EnvParams::new()
        .add_layer(Arc::new(RecordingLayer {
            name: "a",
            fail: false,
            log: Arc::clone(&log),
        }))
        .add_layer(Arc::new(RecordingLayer {
            name: "b",
            fail: true,
            log: Arc::clone(&log),
        }));

    let result = Environment::launch(params, |_env| {
        unreachable!("init must not run when a layer fails to start");
    });

    assert!(matches!(result, Err(EnvError::LayerStartFailed { index: 1, .. })));
    assert_eq!(*log.lock(), vec!["start:a", "stop:a"]);
}
