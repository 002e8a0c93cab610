//! Coordination primitive behavior: flags, tracked values, conditions,
//! streams, resources, time builders.

mod common;

use common::*;
use musim::{
    Capacities, Channel, Fault, Flag, Lock, Queue, Resources, Sim, Simulation, StreamClosed,
    TaskState, Tracked, UsageError,
};

// ============================================================================
// Flag
// ============================================================================

#[test]
fn setting_a_flag_to_its_value_wakes_nobody() {
    init_test_logging();
    let log: Recorder<&'static str> = recorder();
    let flag = Flag::new();
    let mut sim = Simulation::new();
    let waiter = {
        let log = log.clone();
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&flag.cond()).await?;
            log.borrow_mut().push("woken");
            Ok(())
        })
    };
    {
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            // Already false: a no-op, nobody wakes.
            flag.clear(&s).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(waiter.state(), TaskState::Waiting);
}

#[test]
fn inverted_flag_condition_fires_on_clearing() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let flag = Flag::new();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            flag.set(&s).await?;
            s.sleep(1.0).await?;
            flag.clear(&s).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    {
        let log = log.clone();
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            // Wait until the flag is set, then until it is cleared again.
            s.wait(&flag.cond()).await?;
            s.wait(&!flag.cond()).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![1.0, 1.0]);
}

// ============================================================================
// Condition algebra
// ============================================================================

#[test]
fn conjunction_requires_all_operands() {
    init_test_logging();
    let log: Recorder<(&'static str, f64)> = recorder();
    let a = Flag::new();
    let b = Flag::new();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let (a, b) = (a.clone(), b.clone());
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&(a.cond() & b.cond())).await?;
            log.borrow_mut().push(("both", s.now().as_f64()));
            Ok(())
        });
    }
    {
        let (a, b) = (a.clone(), b.clone());
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            a.set(&s).await?;
            s.sleep(1.0).await?;
            b.set(&s).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![("both", 2.0)]);
}

#[test]
fn disjunction_fires_on_first_operand() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let a = Flag::new();
    let b = Flag::new();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let (a, b) = (a.clone(), b.clone());
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&(a.cond() | b.cond())).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(3.0).await?;
        b.set(&s).await?;
        Ok(())
    });
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![3.0]);
    assert!(!a.get());
}

#[test]
fn negated_conjunction_matches_de_morgan() {
    init_test_logging();
    let log: Recorder<&'static str> = recorder();
    let a = Flag::new();
    let b = Flag::new();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let (a, b) = (a.clone(), b.clone());
        sim.spawn::<(), _, _>(move |s| async move {
            a.set(&s).await?;
            b.set(&s).await?;
            // Both true: neither form of "not both" holds yet.
            let structural = !(a.cond() & b.cond());
            let rewritten = !a.cond() | !b.cond();
            s.sleep(1.0).await?;
            b.clear(&s).await?;
            assert!(structural.to_string() != rewritten.to_string());
            s.wait(&structural).await?;
            s.wait(&rewritten).await?;
            log.borrow_mut().push("released");
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec!["released"]);
}

// ============================================================================
// Time builders
// ============================================================================

#[test]
fn before_fires_only_while_still_early() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&s.before(1.0)).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    let late = sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(2.0).await?;
        // Past the bound: suspends forever.
        s.wait(&s.before(1.0)).await?;
        Ok(())
    });
    sim.run_until(10.0).unwrap();
    assert_eq!(*log.borrow(), vec![0.0]);
    assert_eq!(late.state(), TaskState::Waiting);
}

#[test]
fn negated_moment_fires_on_the_next_advance() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(5.0).await?;
            // Exactly at 5: "time != 5" becomes true on the next advance.
            s.wait(&!s.at(5.0)).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    sim.spawn::<(), _, _>(move |s| async move { s.sleep(6.0).await });
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![6.0]);
}

#[test]
fn interval_pacing_is_anchored_while_delay_pacing_drifts() {
    init_test_logging();
    let log: Recorder<(&'static str, f64)> = recorder();
    let mut sim = Simulation::new();
    for (kind, name) in [("interval", "anchored"), ("delay", "drifting")] {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let mut steps = if kind == "interval" {
                s.every_interval(10.0)
            } else {
                s.every_delay(10.0)
            };
            loop {
                let now = steps.next(&s).await?;
                log.borrow_mut().push((name, now.as_f64()));
                // In-step work shifts delay pacing but not interval pacing.
                s.sleep(1.0).await?;
            }
        });
    }
    sim.run_until(32.0).unwrap();
    let log = log.borrow();
    let anchored: Vec<f64> = log.iter().filter(|(n, _)| *n == "anchored").map(|(_, t)| *t).collect();
    let drifting: Vec<f64> = log.iter().filter(|(n, _)| *n == "drifting").map(|(_, t)| *t).collect();
    assert_eq!(anchored, vec![10.0, 20.0, 30.0]);
    assert_eq!(drifting, vec![10.0, 21.0, 32.0]);
}

// ============================================================================
// Tracked values
// ============================================================================

#[test]
fn tracked_comparisons_reevaluate_on_mutation() {
    init_test_logging();
    let log: Recorder<(&'static str, f64)> = recorder();
    let coffee = Tracked::new(1.0_f64);
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let coffee = coffee.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&coffee.lt(0.1)).await?;
            log.borrow_mut().push(("low", s.now().as_f64()));
            coffee.add(&s, 0.9).await?;
            log.borrow_mut().push(("refilled", s.now().as_f64()));
            Ok(())
        });
    }
    {
        let coffee = coffee.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            for _ in 0..3 {
                s.sleep(1.0).await?;
                coffee.sub(&s, 0.4).await?;
            }
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![("low", 3.0), ("refilled", 3.0)]);
    assert!((coffee.get() - 0.7).abs() < 1e-9);
}

#[test]
fn tracked_can_compare_against_tracked() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let supply = Tracked::new(0_i64);
    let demand = Tracked::new(3_i64);
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let (supply, demand) = (supply.clone(), demand.clone());
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&supply.ge(&demand)).await?;
            log.borrow_mut().push(s.now().as_f64());
            Ok(())
        });
    }
    sim.spawn::<(), _, _>(move |s| async move {
        for _ in 0..3 {
            s.sleep(1.0).await?;
            supply.add(&s, 1).await?;
        }
        Ok(())
    });
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![3.0]);
}

// ============================================================================
// Lock
// ============================================================================

#[test]
fn recursive_acquisition_is_a_usage_error() {
    init_test_logging();
    let lock = Lock::new();
    let mut sim = Simulation::new();
    sim.spawn::<(), _, _>(move |s| async move {
        let _guard = lock.acquire(&s).await?;
        assert!(!lock.available());
        let second = lock.acquire(&s).await;
        assert!(matches!(
            second,
            Err(Fault::Usage(UsageError::RecursiveLock))
        ));
        Ok(())
    });
    sim.run().unwrap();
}

#[test]
fn cancelled_waiter_passes_the_lock_on() {
    init_test_logging();
    let log: Recorder<u32> = recorder();
    let lock = Lock::new();
    let mut sim = Simulation::new();
    let mut handles = Vec::new();
    for i in 0..3u32 {
        let log = log.clone();
        let lock = lock.clone();
        handles.push(sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(f64::from(i)).await?;
            let _guard = lock.acquire(&s).await?;
            log.borrow_mut().push(i);
            s.sleep(10.0).await?;
            Ok(())
        }));
    }
    let middle = handles.remove(1);
    sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(5.0).await?;
        // Task 1 is queued behind task 0; cancelling it must not strand
        // task 2.
        middle.cancel();
        Ok(())
    });
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![0, 2]);
}

// ============================================================================
// Broadcast channel
// ============================================================================

#[test]
fn channel_broadcasts_to_all_pending_receivers() {
    init_test_logging();
    let log: Recorder<(&'static str, String)> = recorder();
    let channel: Channel<String> = Channel::new();
    let mut sim = Simulation::new();
    for name in ["r1", "r2"] {
        let log = log.clone();
        let channel = channel.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let message = channel.recv(&s).await?;
            log.borrow_mut().push((name, message));
            Ok(())
        });
    }
    {
        let channel = channel.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            channel.put(&s, "news".to_owned()).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(
        *log.borrow(),
        vec![("r1", "news".to_owned()), ("r2", "news".to_owned())]
    );
}

#[test]
fn channel_reader_buffers_between_polls() {
    init_test_logging();
    let log: Recorder<u32> = recorder();
    let channel: Channel<u32> = Channel::new();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        let channel = channel.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let mut reader = channel.reader();
            while let Some(value) = reader.next(&s).await? {
                log.borrow_mut().push(value);
                // Busy while more messages are broadcast.
                s.sleep(3.0).await?;
            }
            Ok(())
        });
    }
    {
        let channel = channel.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            for value in 1..=3u32 {
                s.sleep(1.0).await?;
                channel.put(&s, value).await?;
            }
            channel.close(&s);
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![1, 2, 3]);
}

#[test]
fn closed_channel_reports_stream_closed() {
    init_test_logging();
    let channel: Channel<u32> = Channel::new();
    let mut sim = Simulation::new();
    let pending = {
        let channel = channel.clone();
        sim.spawn::<(), _, _>(move |s| async move { channel.recv(&s).await.map(|_| ()) })
    };
    sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(1.0).await?;
        channel.close(&s);
        let refused = channel.put(&s, 7).await;
        assert!(matches!(refused, Err(Fault::Stream(StreamClosed))));
        Ok(())
    });
    let err = sim.run().unwrap_err();
    let concurrent = err.concurrent().expect("receiver failed with StreamClosed");
    assert!(concurrent.contains::<StreamClosed>());
    assert_eq!(pending.state(), TaskState::Failed);
}

// ============================================================================
// Anycast queue
// ============================================================================

#[test]
fn queue_hands_messages_to_waiters_in_order() {
    init_test_logging();
    let log: Recorder<(&'static str, &'static str)> = recorder();
    let queue: Queue<&'static str> = Queue::new();
    let mut sim = Simulation::new();
    for name in ["c1", "c2"] {
        let log = log.clone();
        let queue = queue.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let message = queue.get(&s).await?;
            log.borrow_mut().push((name, message));
            Ok(())
        });
    }
    {
        let queue = queue.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            queue.put(&s, "a").await?;
            queue.put(&s, "b").await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![("c1", "a"), ("c2", "b")]);
}

#[test]
fn closed_queue_drains_its_buffer_first() {
    init_test_logging();
    let log: Recorder<Result<u32, bool>> = recorder();
    let queue: Queue<u32> = Queue::new();
    let mut sim = Simulation::new();
    {
        let queue = queue.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            queue.put(&s, 1).await?;
            queue.put(&s, 2).await?;
            queue.close(&s);
            Ok(())
        });
    }
    {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            for _ in 0..3 {
                match queue.get(&s).await {
                    Ok(value) => log.borrow_mut().push(Ok(value)),
                    Err(Fault::Stream(StreamClosed)) => log.borrow_mut().push(Err(true)),
                    Err(other) => return Err(other),
                }
            }
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![Ok(1), Ok(2), Err(true)]);
}

// ============================================================================
// Resources and capacities
// ============================================================================

#[test]
fn claims_are_granted_strictly_in_order() {
    init_test_logging();
    let log: Recorder<(&'static str, f64)> = recorder();
    let pool = Resources::new(&[("a", 4.0)]);
    let mut sim = Simulation::new();
    // Holder takes everything; a large claim queues first, then a small
    // one. The small claim must not jump the queue even though it would
    // fit sooner.
    {
        let pool = pool.clone();
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let held = pool.borrow(&s, &[("a", 3.0)]).await?;
            log.borrow_mut().push(("holder", s.now().as_f64()));
            s.sleep(10.0).await?;
            drop(held);
            Ok(())
        });
    }
    {
        let pool = pool.clone();
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            let held = pool.borrow(&s, &[("a", 4.0)]).await?;
            log.borrow_mut().push(("large", s.now().as_f64()));
            s.sleep(5.0).await?;
            drop(held);
            Ok(())
        });
    }
    {
        let pool = pool.clone();
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(2.0).await?;
            let held = pool.borrow(&s, &[("a", 1.0)]).await?;
            log.borrow_mut().push(("small", s.now().as_f64()));
            drop(held);
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(
        *log.borrow(),
        vec![("holder", 0.0), ("large", 10.0), ("small", 15.0)]
    );
}

#[test]
fn produce_and_consume_transfer_permanently() {
    init_test_logging();
    let pool = Resources::new(&[("fuel", 1.0)]);
    let mut sim = Simulation::new();
    {
        let pool = pool.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            pool.consume(&s, &[("fuel", 3.0)]).await?;
            assert_eq!(s.now().as_f64(), 2.0);
            Ok(())
        });
    }
    {
        let pool = pool.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(2.0).await?;
            pool.produce(&s, &[("fuel", 2.0)]).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(pool.level("fuel"), Some(0.0));
}

#[test]
fn capacity_bounds_are_enforced() {
    init_test_logging();
    let pool = Capacities::new(&[("cores", 8.0)]);
    let mut sim = Simulation::new();
    {
        let pool = pool.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let oversized = pool.borrow(&s, &[("cores", 9.0)]).await;
            assert!(matches!(oversized, Err(Fault::Unavailable(_))));

            pool.consume(&s, &[("cores", 2.0)]).await?;
            let refused = pool.produce(&s, &[("cores", 3.0)]).await;
            assert!(matches!(
                refused,
                Err(Fault::Usage(UsageError::CapacityExceeded))
            ));
            pool.produce(&s, &[("cores", 2.0)]).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(pool.level("cores"), Some(8.0));
}

#[test]
fn unknown_commodity_is_a_usage_error() {
    init_test_logging();
    let pool = Resources::new(&[("a", 1.0)]);
    let mut sim = Simulation::new();
    sim.spawn::<(), _, _>(move |s| async move {
        let refused = pool.borrow(&s, &[("b", 1.0)]).await;
        assert!(matches!(
            refused,
            Err(Fault::Usage(UsageError::UnknownCommodity))
        ));
        Ok(())
    });
    sim.run().unwrap();
}

// ============================================================================
// Scope extras
// ============================================================================

#[test]
fn children_can_await_the_end_of_their_scope() {
    init_test_logging();
    let log: Recorder<(&'static str, f64)> = recorder();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let body_sim = s.clone();
            let body_log = log.clone();
            s.scope(move |scope| async move {
                let watcher_scope = scope.clone();
                let log = body_log.clone();
                scope.spawn::<(), _, _>(move |c: Sim| async move {
                    c.wait(&watcher_scope.ended()).await?;
                    log.borrow_mut().push(("graceful", c.now().as_f64()));
                    Ok(())
                });
                body_sim.sleep(2.0).await?;
                Ok(())
            })
            .await?;
            log.borrow_mut().push(("exited", s.now().as_f64()));
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec![("graceful", 2.0), ("exited", 2.0)]);
}

#[test]
fn spawn_after_delays_the_start() {
    init_test_logging();
    let log: Recorder<f64> = recorder();
    let mut sim = Simulation::new();
    {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let log2 = log.clone();
            let log3 = log.clone();
            s.scope(move |scope| async move {
                scope.spawn_after::<(), _, _>(3.0, move |c: Sim| async move {
                    log2.borrow_mut().push(c.now().as_f64());
                    Ok(())
                });
                scope.spawn_after::<(), _, _>(-1.0, move |c: Sim| async move {
                    log3.borrow_mut().push(c.now().as_f64());
                    Ok(())
                });
                Ok(())
            })
            .await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    // Negative delays start immediately.
    assert_eq!(*log.borrow(), vec![0.0, 3.0]);
}

#[test]
fn joined_task_returns_its_value() {
    init_test_logging();
    let mut sim = Simulation::new();
    sim.spawn::<(), _, _>(|s| async move {
        let body_sim = s.clone();
        let answer = s
            .scope(move |scope| async move {
                let task = scope.spawn::<u32, _, _>(|c: Sim| async move {
                    c.sleep(1.0).await?;
                    Ok(42)
                });
                task.join(&body_sim).await
            })
            .await?;
        assert_eq!(answer, 42);
        Ok(())
    });
    sim.run().unwrap();
}
