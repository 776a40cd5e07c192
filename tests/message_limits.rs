//! Message-limit overload control observed end to end.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentry::mchain::{receive_bulk, MchainRef, MsgHandlerSet, ReceiveParams};
use agentry::prelude::*;

#[derive(Debug)]
struct Job {
    #[allow(dead_code)]
    payload: u32,
}

#[derive(Debug)]
struct Unblock;

struct Throttled {
    so: AgentBase,
    handled: Arc<AtomicUsize>,
    gate: MchainRef,
}

impl Agent for Throttled {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        self.so_subscribe_self()
            .event(|agent: &mut Self, _msg: &Unblock| {
                // Blocks the worker until the flood of jobs has been
                // sent, so the limit counter is actually exercised.
                let mut wait = MsgHandlerSet::new().on::<Job>(|_| {});
                let _ = receive_bulk(
                    &agent.gate,
                    &ReceiveParams::new().handle_n(1).empty_timeout(Duration::from_secs(5)),
                    &mut wait,
                );
            })?
            .event(|agent: &mut Self, _msg: &Job| {
                agent.handled.fetch_add(1, Ordering::SeqCst);
            })?
            .event(|agent: &mut Self, _msg: &Original| {
                agent.handled.fetch_add(1, Ordering::SeqCst);
            })?;
        Ok(())
    }
}

/// With `limit_then_redirect(10, trash)` and 20 jobs sent while the
/// agent is busy, exactly 10 jobs reach the agent and exactly 10 land
/// in the trash mbox.
#[test]
fn limit_then_redirect_splits_the_flood() {
    let handled = Arc::new(AtomicUsize::new(0));
    let observed_handled = Arc::clone(&handled);
    let trash_seen = Arc::new(AtomicUsize::new(0));
    let observed_trash = Arc::clone(&trash_seen);

    Environment::launch(EnvParams::new(), move |env| {
        let trash = env.create_mchain(MchainParams::unlimited());
        let gate = env.create_mchain(MchainParams::unlimited());

        let mut coop = env.make_coop();
        let mut base = coop.new_agent_base();
        let trash_mbox = trash.as_mbox();
        base.set_limits(
            MessageLimits::new().limit_then_redirect::<Job>(10, move || trash_mbox.clone()),
        );
        let agent_mbox = base.so_direct_mbox();
        coop.add_agent(Throttled {
            so: base,
            handled: observed_handled,
            gate: Arc::clone(&gate),
        });
        let handle = env.register_coop(coop)?;

        // Park the worker inside a handler, then flood.
        send(&agent_mbox, Unblock)?;
        std::thread::sleep(Duration::from_millis(50));
        for i in 0..20 {
            send(&agent_mbox, Job { payload: i })?;
        }
        gate.send(Job { payload: 0 })?; // release the worker

        // Let the agent drain its queue, then count the redirected jobs.
        std::thread::sleep(Duration::from_millis(200));
        let trash_count = Arc::clone(&observed_trash);
        let mut trash_handlers =
            MsgHandlerSet::new().on::<Job>(move |_| {
                trash_count.fetch_add(1, Ordering::SeqCst);
            });
        receive_bulk(&trash, &ReceiveParams::new(), &mut trash_handlers);

        env.deregister_coop(&handle, DeregReason::Normal)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 10);
    assert_eq!(trash_seen.load(Ordering::SeqCst), 10);
}

#[derive(Debug)]
struct Original {
    value: u32,
}

#[derive(Debug)]
struct Condensed {
    value: u32,
}

/// `limit_then_transform` replaces the overflowing message with a new
/// one addressed wherever the transformation decides.
#[test]
fn limit_then_transform_replaces_the_excess() {
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);

    Environment::launch(EnvParams::new(), move |env| {
        let condensed = env.create_mchain(MchainParams::unlimited());
        let gate = env.create_mchain(MchainParams::unlimited());

        let mut coop = env.make_coop();
        let mut base = coop.new_agent_base();
        let condensed_mbox = condensed.as_mbox();
        base.set_limits(MessageLimits::new().limit_then_transform::<Original>(
            1,
            move |original| {
                agentry::TransformedMessage::new(
                    condensed_mbox.clone(),
                    Condensed {
                        value: original.value,
                    },
                )
            },
        ));
        let agent_mbox = base.so_direct_mbox();
        coop.add_agent(Throttled {
            so: base,
            handled: Arc::new(AtomicUsize::new(0)),
            gate: Arc::clone(&gate),
        });
        let handle = env.register_coop(coop)?;

        send(&agent_mbox, Unblock)?;
        std::thread::sleep(Duration::from_millis(50));
        for i in 0..3 {
            let _ = send(&agent_mbox, Original { value: i });
        }
        gate.send(Job { payload: 0 })?;

        std::thread::sleep(Duration::from_millis(100));
        let count = Arc::clone(&observed);
        let mut handlers = MsgHandlerSet::new().on::<Condensed>(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        receive_bulk(&condensed, &ReceiveParams::new(), &mut handlers);

        env.deregister_coop(&handle, DeregReason::Normal)?;
        Ok(())
    })
    .unwrap();

    // One Original fit under the limit; two were transformed.
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
