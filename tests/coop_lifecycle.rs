//! Cooperation registration/deregistration semantics: tree ordering,
//! notifications, lifecycle hooks and error cases.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use agentry::prelude::*;
use agentry::CoopError;

type Log = Arc<Mutex<Vec<String>>>;

struct Member {
    so: AgentBase,
    name: &'static str,
    starts: Arc<AtomicUsize>,
    finishes: Log,
}

impl Agent for Member {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_evt_start(&mut self) -> HandlerResult {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn so_evt_finish(&mut self) -> HandlerResult {
        self.finishes.lock().push(self.name.to_string());
        Ok(())
    }
}

fn member_coop(
    env: &Environment,
    name: &'static str,
    parent: Option<&CoopHandle>,
    starts: &Arc<AtomicUsize>,
    finishes: &Log,
    dereg_log: &Log,
) -> CoopHandle {
    let mut coop = env.make_coop();
    coop.set_name(name);
    if let Some(parent) = parent {
        coop.set_parent(parent.clone());
    }
    let base = coop.new_agent_base();
    coop.add_agent(Member {
        so: base,
        name,
        starts: Arc::clone(starts),
        finishes: Arc::clone(finishes),
    });
    let observed = Arc::clone(dereg_log);
    coop.add_dereg_notificator(move |_env, handle, reason| {
        observed
            .lock()
            .push(format!("{}:{:?}", handle.name(), reason));
    });
    env.register_coop(coop).unwrap()
}

/// Deregistering the root of a coop tree completes children first
/// (post-order): c11 before c1, c1 and c2 before root.
#[test]
fn coop_tree_deregisters_bottom_up() {
    let starts = Arc::new(AtomicUsize::new(0));
    let finishes: Log = Arc::new(Mutex::new(Vec::new()));
    let dereg_log: Log = Arc::new(Mutex::new(Vec::new()));

    let observed_starts = Arc::clone(&starts);
    let observed_finishes = Arc::clone(&finishes);
    let observed_dereg = Arc::clone(&dereg_log);
    Environment::launch(EnvParams::new(), move |env| {
        let root = member_coop(
            env,
            "root",
            None,
            &observed_starts,
            &observed_finishes,
            &observed_dereg,
        );
        let c1 = member_coop(
            env,
            "c1",
            Some(&root),
            &observed_starts,
            &observed_finishes,
            &observed_dereg,
        );
        let _c2 = member_coop(
            env,
            "c2",
            Some(&root),
            &observed_starts,
            &observed_finishes,
            &observed_dereg,
        );
        let _c11 = member_coop(
            env,
            "c11",
            Some(&c1),
            &observed_starts,
            &observed_finishes,
            &observed_dereg,
        );

        env.deregister_coop(&root, DeregReason::Normal)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 4);

    // Every agent finished exactly once.
    let mut finish_names = finishes.lock().clone();
    finish_names.sort();
    assert_eq!(finish_names, vec!["c1", "c11", "c2", "root"]);

    let order = dereg_log.lock().clone();
    let position = |name: &str| {
        order
            .iter()
            .position(|entry| entry.starts_with(&format!("{name}:")))
            .unwrap_or_else(|| panic!("{name} missing from {order:?}"))
    };
    assert!(position("c11") < position("c1"));
    assert!(position("c1") < position("root"));
    assert!(position("c2") < position("root"));

    // Reasons: explicit for the root, parent-driven for descendants.
    assert!(order[position("root")].contains("Normal"));
    assert!(order[position("c1")].contains("ParentDeregistration"));
    assert!(order[position("c11")].contains("ParentDeregistration"));
}

/// One dereg notification per listener with the requested reason;
/// repeated dereg requests are no-ops.
#[test]
fn dereg_notification_fires_once_with_reason() {
    let notifications = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&notifications);

    Environment::launch(EnvParams::new(), move |env| {
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        coop.add_agent(Member {
            so: base,
            name: "solo",
            starts: Arc::new(AtomicUsize::new(0)),
            finishes: Arc::new(Mutex::new(Vec::new())),
        });
        let count = Arc::clone(&observed);
        coop.add_dereg_notificator(move |_env, _handle, reason| {
            assert_eq!(reason, DeregReason::User(42));
            count.fetch_add(1, Ordering::SeqCst);
        });
        let handle = env.register_coop(coop)?;

        env.deregister_coop(&handle, DeregReason::User(42))?;
        // The second request must be a silent no-op (first reason wins).
        let _ = env.deregister_coop(&handle, DeregReason::Normal);
        Ok(())
    })
    .unwrap();

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[test]
fn duplicate_coop_name_is_rejected() {
    Environment::launch(EnvParams::new(), |env| {
        let mut first = env.make_coop();
        first.set_name("twin");
        let base = first.new_agent_base();
        first.add_agent(Member {
            so: base,
            name: "first",
            starts: Arc::new(AtomicUsize::new(0)),
            finishes: Arc::new(Mutex::new(Vec::new())),
        });
        let handle = env.register_coop(first)?;

        let mut second = env.make_coop();
        second.set_name("twin");
        let base = second.new_agent_base();
        second.add_agent(Member {
            so: base,
            name: "second",
            starts: Arc::new(AtomicUsize::new(0)),
            finishes: Arc::new(Mutex::new(Vec::new())),
        });
        let result = env.register_coop(second);
        assert!(matches!(
            result,
            Err(CoopError::CoopAlreadyRegistered { .. })
        ));

        env.deregister_coop(&handle, DeregReason::Normal)?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn empty_coop_is_rejected() {
    Environment::launch(EnvParams::new(), |env| {
        let coop = env.make_coop();
        assert!(matches!(
            env.register_coop(coop),
            Err(CoopError::EmptyCoop)
        ));
        env.stop();
        Ok(())
    })
    .unwrap();
}

#[test]
fn registration_after_stop_is_rejected() {
    Environment::launch(EnvParams::new(), |env| {
        env.stop();
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        coop.add_agent(Member {
            so: base,
            name: "late",
            starts: Arc::new(AtomicUsize::new(0)),
            finishes: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(matches!(
            env.register_coop(coop),
            Err(CoopError::EnvStopInProgress)
        ));
        Ok(())
    })
    .unwrap();
}

struct BrokenOnDefine {
    so: AgentBase,
}

impl Agent for BrokenOnDefine {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        Err("deliberate definition failure".into())
    }
}

/// A failing `so_define_agent` rolls the whole registration back; the
/// environment stays usable.
#[test]
fn failed_definition_rolls_back() {
    let starts = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&starts);

    Environment::launch(EnvParams::new(), move |env| {
        let mut broken = env.make_coop();
        broken.set_name("broken");
        let base = broken.new_agent_base();
        broken.add_agent(BrokenOnDefine { so: base });
        let result = env.register_coop(broken);
        assert!(matches!(
            result,
            Err(CoopError::AgentDefinitionFailed { .. })
        ));

        // The name is free again and the environment still works.
        let mut good = env.make_coop();
        good.set_name("broken");
        let base = good.new_agent_base();
        good.add_agent(Member {
            so: base,
            name: "good",
            starts: Arc::clone(&observed),
            finishes: Arc::new(Mutex::new(Vec::new())),
        });
        let handle = env.register_coop(good)?;
        env.deregister_coop(&handle, DeregReason::Normal)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
}
