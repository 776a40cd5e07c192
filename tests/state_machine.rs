//! Hierarchical state machine semantics: state inheritance of handlers,
//! LCA-based enter/exit hook ordering and state time limits.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use agentry::prelude::*;

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().push(entry.into());
}

// ---------------------------------------------------------------------
// State inheritance

#[derive(Debug)]
struct X;

#[derive(Debug)]
struct ToS2;

#[derive(Debug)]
struct AddOverride;

#[derive(Debug)]
struct RemoveOverride;

#[derive(Debug)]
struct Finish;

struct Inheritor {
    so: AgentBase,
    root: State,
    s1: State,
    s2: State,
    log: Log,
}

impl Inheritor {
    fn new(mut so: AgentBase, log: Log) -> Self {
        let root = so.state("root").unwrap();
        let s1 = so.substate("s1", root).unwrap();
        let s2 = so.substate("s2", root).unwrap();
        so.initial_substate(root, s1).unwrap();
        Self {
            so,
            root,
            s1,
            s2,
            log,
        }
    }
}

impl Agent for Inheritor {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        let root = self.root;
        let s2 = self.s2;
        self.so_subscribe_self()
            .in_state(root)
            .event(|agent: &mut Self, _msg: &X| {
                let state = agent.so_base().so_current_state();
                let name = if state == agent.s1 { "s1" } else { "s2" };
                let log = Arc::clone(&agent.log);
                push(&log, format!("root-handler in {name}"));
            })?
            .event(move |agent: &mut Self, _msg: &ToS2| {
                agent.so_change_state(s2).unwrap();
            })?
            .event(|agent: &mut Self, _msg: &AddOverride| {
                let mbox = agent.so_base().so_direct_mbox();
                let s1 = agent.s1;
                agent
                    .so_subscribe(&mbox)
                    .in_state(s1)
                    .event(|agent: &mut Self, _msg: &X| {
                        let log = Arc::clone(&agent.log);
                        push(&log, "override-handler");
                    })
                    .unwrap();
                agent.so_change_state(s1).unwrap();
            })?
            .event(|agent: &mut Self, _msg: &RemoveOverride| {
                let mbox = agent.so_base().so_direct_mbox();
                let s1 = agent.s1;
                agent
                    .so_base_mut()
                    .so_drop_subscription::<X>(&mbox, s1)
                    .unwrap();
            })?
            .event(|agent: &mut Self, _msg: &Finish| {
                agent.so_base().so_environment().stop();
            })?;
        Ok(())
    }

    fn so_evt_start(&mut self) -> HandlerResult {
        let root = self.root;
        self.so_change_state(root)?;
        Ok(())
    }
}

#[test]
fn handler_inheritance_and_override() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&log);

    Environment::launch(EnvParams::new(), move |env| {
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        let mbox = base.so_direct_mbox();
        coop.add_agent(Inheritor::new(base, observed));
        env.register_coop(coop)?;

        // Strict FIFO from one sender: the script below executes in
        // order on the agent.
        send(&mbox, X)?; // inherited from root while in s1
        send(&mbox, ToS2)?;
        send(&mbox, X)?; // inherited from root while in s2
        send(&mbox, AddOverride)?; // subscribes override in s1, moves there
        send(&mbox, X)?; // override wins over root
        send(&mbox, RemoveOverride)?;
        send(&mbox, X)?; // back to the inherited handler
        send(&mbox, Finish)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "root-handler in s1",
            "root-handler in s2",
            "override-handler",
            "root-handler in s1",
        ]
    );
}

// ---------------------------------------------------------------------
// Enter/exit hook ordering across an LCA transition

#[derive(Debug)]
struct Cross;

#[derive(Debug)]
struct Done;

struct Walker {
    so: AgentBase,
    root: State,
    s2: State,
    log: Log,
}

impl Walker {
    fn new(mut so: AgentBase, log: Log) -> Self {
        let root = so.state("root").unwrap();
        let s1 = so.substate("s1", root).unwrap();
        let s1a = so.substate("s1a", s1).unwrap();
        let s2 = so.substate("s2", root).unwrap();
        so.initial_substate(root, s1).unwrap();
        so.initial_substate(s1, s1a).unwrap();

        for (state, name) in [(root, "root"), (s1, "s1"), (s1a, "s1a"), (s2, "s2")] {
            let enter_log = Arc::clone(&log);
            so.on_enter::<Walker>(state, move |_agent| push(&enter_log, format!("enter:{name}")))
                .unwrap();
            let exit_log = Arc::clone(&log);
            so.on_exit::<Walker>(state, move |_agent| push(&exit_log, format!("exit:{name}")))
                .unwrap();
        }
        Self { so, root, s2, log }
    }
}

impl Agent for Walker {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_define_agent(&mut self) -> HandlerResult {
        let root = self.root;
        let s2 = self.s2;
        self.so_subscribe_self()
            .in_state(root)
            .event(move |agent: &mut Self, _msg: &Cross| {
                agent.so_change_state(s2).unwrap();
            })?
            .event(|agent: &mut Self, _msg: &Done| {
                agent.so_base().so_environment().stop();
            })?;
        Ok(())
    }

    fn so_evt_start(&mut self) -> HandlerResult {
        let root = self.root;
        self.so_change_state(root)?;
        self.log.lock().push("--".to_string());
        Ok(())
    }
}

#[test]
fn lca_transition_runs_hooks_in_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&log);

    Environment::launch(EnvParams::new(), move |env| {
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        let mbox = base.so_direct_mbox();
        coop.add_agent(Walker::new(base, observed));
        env.register_coop(coop)?;
        send(&mbox, Cross)?;
        send(&mbox, Done)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            // Entering the composite target descends initial substates.
            "enter:root",
            "enter:s1",
            "enter:s1a",
            "--",
            // s1a -> s2: LCA is root; exits leaf-to-root, enters
            // root-to-leaf, root itself untouched.
            "exit:s1a",
            "exit:s1",
            "enter:s2",
        ]
    );
}

// ---------------------------------------------------------------------
// State time limit

struct TimeLimited {
    so: AgentBase,
    work: State,
    flagged: Arc<AtomicBool>,
}

impl TimeLimited {
    fn new(mut so: AgentBase, flagged: Arc<AtomicBool>) -> Self {
        let work = so.state("work").unwrap();
        let idle = so.state("idle").unwrap();
        so.time_limit(work, Duration::from_millis(50), idle)
            .unwrap();

        let observed = Arc::clone(&flagged);
        so.on_enter::<TimeLimited>(idle, move |agent| {
            observed.store(true, Ordering::SeqCst);
            agent.so_base().so_environment().stop();
        })
        .unwrap();
        Self { so, work, flagged }
    }
}

impl Agent for TimeLimited {
    fn so_base(&self) -> &AgentBase {
        &self.so
    }

    fn so_base_mut(&mut self) -> &mut AgentBase {
        &mut self.so
    }

    fn so_evt_start(&mut self) -> HandlerResult {
        let work = self.work;
        self.so_change_state(work)?;
        assert!(!self.flagged.load(Ordering::SeqCst));
        Ok(())
    }
}

#[test]
fn state_time_limit_moves_the_agent() {
    let flagged = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&flagged);

    Environment::launch(EnvParams::new(), move |env| {
        let mut coop = env.make_coop();
        let base = coop.new_agent_base();
        coop.add_agent(TimeLimited::new(base, observed));
        env.register_coop(coop)?;
        Ok(())
    })
    .unwrap();

    assert!(flagged.load(Ordering::SeqCst));
}
