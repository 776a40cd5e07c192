// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::{ExtractOutcome, ExtractionStatus, MchainRef, MsgHandlerSet, ReceiveResult};

/// Wakeup channel registered with every chain a `select` waits on.
/// Chains signal it when a message lands in an empty queue or when the
/// chain closes.
pub(crate) struct SelectSignal {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl SelectSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            signaled: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn notify(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cv.notify_all();
    }

    /// Wait until signaled or `deadline`; consumes the signal.
    fn wait_until(&self, deadline: Option<Instant>) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(&mut signaled),
            }
        }
        *signaled = false;
    }
}

/// One chain plus its handlers inside a `select`.
pub struct SelectCase {
    chain: MchainRef,
    handlers: MsgHandlerSet,
}

impl SelectCase {
    pub fn new(chain: MchainRef, handlers: MsgHandlerSet) -> Self {
        Self { chain, handlers }
    }
}

/// Parameters of a `select`.
#[derive(Default, Clone)]
pub struct SelectParams {
    /// Stop after this many handled messages. `None` keeps selecting
    /// until every chain is closed (or the time budget runs out).
    pub handle_n: Option<usize>,
    /// Overall time budget.
    pub total_time: Option<Duration>,
}

impl SelectParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `n` handled messages.
    pub fn handle_n(mut self, n: usize) -> Self {
        self.handle_n = Some(n);
        self
    }

    /// Overall time budget.
    pub fn total_time(mut self, time: Duration) -> Self {
        self.total_time = Some(time);
        self
    }
}

/// Wait across several chains at once; a ready chain (non-empty or
/// closed) is served with its own handler set. Chains are probed
/// round-robin, so one busy chain cannot starve the others completely.
pub fn select(params: &SelectParams, cases: &mut [SelectCase]) -> ReceiveResult {
    let signal = SelectSignal::new();
    for case in cases.iter() {
        case.chain.add_waiter(Arc::downgrade(&signal));
    }

    let deadline = params.total_time.map(|t| Instant::now() + t);
    let mut extracted = 0usize;
    let mut handled = 0usize;
    let mut status = ExtractionStatus::NoMessages;

    loop {
        if params.handle_n.is_some_and(|n| handled >= n) {
            break;
        }

        let mut progressed = false;
        let mut closed = 0usize;
        for case in cases.iter_mut() {
            if params.handle_n.is_some_and(|n| handled >= n) {
                break;
            }
            match case.chain.try_extract() {
                ExtractOutcome::Msg(message) => {
                    extracted += 1;
                    if case.handlers.dispatch(&message) {
                        handled += 1;
                    }
                    status = ExtractionStatus::MsgExtracted;
                    progressed = true;
                }
                ExtractOutcome::Empty => {}
                ExtractOutcome::Closed => closed += 1,
            }
        }

        if closed == cases.len() {
            if extracted == 0 {
                status = ExtractionStatus::ChainClosed;
            }
            break;
        }
        if progressed {
            continue;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        signal.wait_until(deadline);
    }

    ReceiveResult {
        extracted,
        handled,
        status,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::{CloseMode, Mchain, MchainParams};
    use super::*;
    use crate::util::MboxId;

    #[derive(Debug)]
    struct FromA {
        value: u32,
    }

    #[derive(Debug)]
    struct FromB {
        value: u32,
    }

    #[test]
    fn test_select_takes_from_the_ready_chain() {
        let a = Mchain::new(MboxId::from_raw(1), MchainParams::unlimited());
        let b = Mchain::new(MboxId::from_raw(2), MchainParams::unlimited());
        b.send(FromB { value: 7 }).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = Arc::clone(&seen);
        let seen_b = Arc::clone(&seen);
        let mut cases = [
            SelectCase::new(
                Arc::clone(&a),
                MsgHandlerSet::new().on::<FromA>(move |m| seen_a.lock().push(("a", m.value))),
            ),
            SelectCase::new(
                Arc::clone(&b),
                MsgHandlerSet::new().on::<FromB>(move |m| seen_b.lock().push(("b", m.value))),
            ),
        ];

        let r = select(&SelectParams::new().handle_n(1), &mut cases);
        assert_eq!(r.handled, 1);
        assert_eq!(*seen.lock(), vec![("b", 7)]);
    }

    #[test]
    fn test_select_wakes_on_late_send() {
        let a = Mchain::new(MboxId::from_raw(1), MchainParams::unlimited());
        let producer = {
            let a = Arc::clone(&a);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                a.send(FromA { value: 1 }).unwrap();
            })
        };

        let got = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&got);
        let mut cases = [SelectCase::new(
            Arc::clone(&a),
            MsgHandlerSet::new().on::<FromA>(move |m| *sink.lock() = m.value),
        )];

        let r = select(
            &SelectParams::new().handle_n(1).total_time(Duration::from_secs(5)),
            &mut cases,
        );
        producer.join().unwrap();
        assert_eq!(r.handled, 1);
        assert_eq!(*got.lock(), 1);
    }

    #[test]
    fn test_select_times_out() {
        let a = Mchain::new(MboxId::from_raw(1), MchainParams::unlimited());
        let mut cases = [SelectCase::new(
            Arc::clone(&a),
            MsgHandlerSet::new().on::<FromA>(|_| {}),
        )];

        let started = Instant::now();
        let r = select(
            &SelectParams::new().total_time(Duration::from_millis(50)),
            &mut cases,
        );
        assert_eq!(r.status, ExtractionStatus::NoMessages);
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_select_finishes_when_all_chains_close() {
        let a = Mchain::new(MboxId::from_raw(1), MchainParams::unlimited());
        let b = Mchain::new(MboxId::from_raw(2), MchainParams::unlimited());

        let closer = {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(40));
                a.close(CloseMode::DropContent);
                b.close(CloseMode::DropContent);
            })
        };

        let mut cases = [
            SelectCase::new(Arc::clone(&a), MsgHandlerSet::new().on::<FromA>(|_| {})),
            SelectCase::new(Arc::clone(&b), MsgHandlerSet::new().on::<FromB>(|_| {})),
        ];
        let r = select(
            &SelectParams::new().total_time(Duration::from_secs(5)),
            &mut cases,
        );
        closer.join().unwrap();
        assert_eq!(r.status, ExtractionStatus::ChainClosed);
    }
}
