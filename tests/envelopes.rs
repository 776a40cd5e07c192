//! Envelope access hooks around delivery.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentry::message::{Envelope, EnvelopeInvoker};
use agentry::prelude::*;
use agentry::{send_enveloped, MsgTypeId};

#[derive(Debug)]
struct Payload {
    value: u32,
}

#[derive(Debug)]
struct Finish;

/// Envelope whose hook can be switched off: when revoked it never
/// calls the invoker, so the subscriber's handler is suppressed.
struct Revocable {
    inner: MessageRef,
    revoked: Arc<AtomicBool>,
    hook_calls: Arc<AtomicUsize>,
}

impl Envelope for Revocable {
    fn handler_found_hook(&self, invoker: &mut dyn EnvelopeInvoker) {
        self.hook_calls.fetch_add(1, Ordering::SeqCst);
        if !self.revoked.load(Ordering::SeqCst) {
            invoker.invoke(&self.inner);
        }
    }

    fn transformation_hook(&self, invoker: &mut dyn EnvelopeInvoker) {
        if !self.revoked.load(Ordering::SeqCst) {
            invoker.invoke(&self.inner);
        }
    }
}

struct Receiver {
    so: AgentBase,
    handled: Arc<AtomicUsize>,
}

impl Agent for Receiver {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        self.so_subscribe_self()
            .event(|agent: &mut Self, msg: &Payload| {
                assert_eq!(msg.value, 7);
                agent.handled.fetch_add(1, Ordering::SeqCst);
            })?
            .event(|agent: &mut Self, _msg: &Finish| {
                agent.so_base().so_environment().stop();
            })?;
        Ok(())
    }
}

#[test]
fn envelope_hook_controls_handler_invocation() {
    let handled = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let observed_handled = Arc::clone(&handled);
    let observed_hooks = Arc::clone(&hook_calls);

    Environment::launch(EnvParams::new(), move |env| {
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        let mbox = base.so_direct_mbox();
        coop.add_agent(Receiver {
            so: base,
            handled: Arc::clone(&observed_handled),
        });
        env.register_coop(coop)?;

        let tag = MsgTypeId::immutable::<Payload>();

        // A live envelope: the handler runs with the inner payload.
        send_enveloped(
            &mbox,
            tag,
            Revocable {
                inner: MessageRef::message(Payload { value: 7 }),
                revoked: Arc::new(AtomicBool::new(false)),
                hook_calls: Arc::clone(&observed_hooks),
            },
        )?;

        // A revoked envelope: the hook fires, the handler does not.
        send_enveloped(
            &mbox,
            tag,
            Revocable {
                inner: MessageRef::message(Payload { value: 7 }),
                revoked: Arc::new(AtomicBool::new(true)),
                hook_calls: Arc::clone(&observed_hooks),
            },
        )?;

        send(&mbox, Finish)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    // The hook ran exactly once per delivery to the one subscriber.
    assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
}

/// Envelopes stay transparent for delivery filters: the predicate sees
/// the inner payload.
#[test]
fn delivery_filter_sees_through_envelopes() {
    let handled = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&handled);

    Environment::launch(EnvParams::new(), move |env| {
        let shared = env.create_mbox();
        let mut coop = env.make_coop();
        let mut base = coop.new_agent_base();
        base.set_delivery_filter::<Payload>(&shared, |p| p.value >= 5)
            .unwrap();
        let direct = base.so_direct_mbox();

        struct Filtered {
            so: AgentBase,
            shared: MboxRef,
            handled: Arc<AtomicUsize>,
        }
        impl Agent for Filtered {
            fn so_base(&self) -> &AgentBase {
                &self.so
            }
            fn so_base_mut(&mut self) -> &mut AgentBase {
                &mut self.so
            }
            fn so_define_agent(&mut self) -> HandlerResult {
                let shared = Arc::clone(&self.shared);
                self.so_subscribe(&shared)
                    .event(|agent: &mut Self, _msg: &Payload| {
                        agent.handled.fetch_add(1, Ordering::SeqCst);
                    })?;
                self.so_subscribe_self()
                    .event(|agent: &mut Self, _msg: &Finish| {
                        agent.so_base().so_environment().stop();
                    })?;
                Ok(())
            }
        }

        coop.add_agent(Filtered {
            so: base,
            shared: Arc::clone(&shared),
            handled: Arc::clone(&observed),
        });
        env.register_coop(coop)?;

        let tag = MsgTypeId::immutable::<Payload>();
        for value in [1, 5, 9] {
            send_enveloped(
                &shared,
                tag,
                Revocable {
                    inner: MessageRef::message(Payload { value }),
                    revoked: Arc::new(AtomicBool::new(false)),
                    hook_calls: Arc::new(AtomicUsize::new(0)),
                },
            )?;
        }

        std::thread::sleep(Duration::from_millis(100));
        send(&direct, Finish)?;
        Ok(())
    })
    .unwrap();

    // Only 5 and 9 pass the filter.
    assert_eq!(handled.load(Ordering::SeqCst), 2);
}
