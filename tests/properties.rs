//! Quantified kernel invariants.
//!
//! Each test pins one of the kernel's contractual properties: dispatch
//! order, time monotonicity, cancellation idempotence, scope closure
//! completeness, resource conservation and failure exclusivity.

mod common;

use common::*;
use musim::{Concurrent, Fault, Flag, Resources, Sim, Simulation, TaskState, TypeSet};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("boom: {0}")]
struct Boom(&'static str);

// ============================================================================
// Invariant 1: subscription order is resumption order
// ============================================================================

#[test]
fn subscribers_resume_in_subscription_order() {
    init_test_logging();
    let log: Recorder<&'static str> = recorder();
    let flag = Flag::new();
    let mut sim = Simulation::new();
    for name in ["first", "second", "third"] {
        let log = log.clone();
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.wait(&flag.cond()).await?;
            log.borrow_mut().push(name);
            Ok(())
        });
    }
    {
        let flag = flag.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            flag.set(&s).await?;
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
}

// ============================================================================
// Invariant 2: time never decreases
// ============================================================================

#[test]
fn virtual_time_is_monotone() {
    init_test_logging();
    let samples: Recorder<f64> = recorder();
    let mut sim = Simulation::new();
    for period in [0.3, 0.5, 1.1] {
        let samples = samples.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let mut steps = s.every_delay(period);
            loop {
                let now = steps.next(&s).await?;
                samples.borrow_mut().push(now.as_f64());
            }
        });
    }
    sim.run_until(7.0).unwrap();
    let samples = samples.borrow();
    assert!(samples.windows(2).all(|w| w[0] <= w[1]));
}

// ============================================================================
// Invariant 3: no work without tasks
// ============================================================================

#[test]
fn empty_simulation_returns_immediately() {
    let mut sim = Simulation::new();
    sim.run().unwrap();
    assert_eq!(sim.now().as_f64(), 0.0);
}

// ============================================================================
// Invariant 4: cancel is idempotent
// ============================================================================

#[test]
fn double_cancel_equals_single_cancel() {
    init_test_logging();
    let mut sim = Simulation::new();
    let sleeper = sim.spawn::<(), _, _>(|s| async move { s.sleep(100.0).await });
    {
        sim.spawn::<(), _, _>(move |s| async move {
            s.sleep(1.0).await?;
            sleeper.cancel();
            sleeper.cancel();
            let outcome = sleeper.join(&s).await;
            assert!(matches!(outcome, Err(Fault::Cancelled(_))));
            // The second cancel was a no-op; the sleeper died at the first.
            assert_eq!(s.now().as_f64(), 1.0);
            Ok(())
        });
    }
    sim.run().unwrap();
}

#[test]
fn cancel_before_start_prevents_execution() {
    init_test_logging();
    let log: Recorder<&'static str> = recorder();
    let mut sim = Simulation::new();
    let task = {
        let log = log.clone();
        sim.spawn::<(), _, _>(move |_s| async move {
            log.borrow_mut().push("ran");
            Ok(())
        })
    };
    assert_eq!(task.state(), TaskState::Created);
    task.cancel();
    assert_eq!(task.state(), TaskState::Cancelled);
    sim.run().unwrap();
    assert!(log.borrow().is_empty());
}

// ============================================================================
// Invariant 5: scope closure completeness
// ============================================================================

#[test]
fn every_child_is_terminal_after_scope_exit() {
    init_test_logging();
    let states: Recorder<TaskState> = recorder();
    let mut sim = Simulation::new();
    {
        let states = states.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let body_sim = s.clone();
            let handles = recorder();
            let spawned = handles.clone();
            let outcome = s
                .until(s.delay(4.0), move |scope| async move {
                    spawned
                        .borrow_mut()
                        .push(scope.spawn::<(), _, _>(|c: Sim| async move { c.sleep(2.0).await }));
                    spawned
                        .borrow_mut()
                        .push(scope.spawn::<(), _, _>(|c: Sim| async move { c.sleep(9.0).await }));
                    spawned.borrow_mut().push(
                        scope.spawn_volatile::<(), _, _>(|c: Sim| async move {
                            c.eternity().await
                        }),
                    );
                    body_sim.sleep(1.0).await?;
                    Ok(())
                })
                .await?;
            assert_eq!(outcome, Some(()));
            for task in handles.borrow().iter() {
                states.borrow_mut().push(task.state());
            }
            Ok(())
        });
    }
    sim.run().unwrap();
    let states = states.borrow();
    assert_eq!(states.len(), 3);
    assert!(states.iter().all(|s| s.is_terminal()));
}

// ============================================================================
// Invariant 6: conservation of resources
// ============================================================================

#[test]
fn borrowed_levels_are_conserved() {
    init_test_logging();
    let pool = Resources::new(&[("slots", 5.0)]);
    let mut sim = Simulation::new();
    for i in 0..4u32 {
        let pool = pool.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            for _ in 0..3 {
                let held = pool.borrow(&s, &[("slots", 2.0)]).await?;
                s.sleep(f64::from(i % 2) + 0.5).await?;
                drop(held);
            }
            Ok(())
        });
    }
    sim.run().unwrap();
    assert_eq!(pool.level("slots"), Some(5.0));
}

#[test]
fn cancelled_claim_rolls_back() {
    init_test_logging();
    let pool = Resources::new(&[("slots", 2.0)]);
    let mut sim = Simulation::new();
    let blocked = {
        let pool = pool.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            // First borrow succeeds, second queues behind the shortage.
            let _held = pool.borrow(&s, &[("slots", 2.0)]).await?;
            pool.borrow(&s, &[("slots", 2.0)]).await?;
            Ok(())
        })
    };
    sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(1.0).await?;
        blocked.cancel();
        Ok(())
    });
    sim.run().unwrap();
    // Both the held borrow and the pending claim released on teardown.
    assert_eq!(pool.level("slots"), Some(2.0));
}

// ============================================================================
// Invariant 7: exception exclusivity at scope exit
// ============================================================================

#[test]
fn body_failure_suppresses_child_aggregation() {
    init_test_logging();
    let captured: Recorder<Fault> = recorder();
    let mut sim = Simulation::new();
    {
        let captured = captured.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let result = s
                .scope(move |scope| async move {
                    scope.spawn::<(), _, _>(|_c: Sim| async move {
                        Err(Fault::app(Boom("child")))
                    });
                    // Fail synchronously, before the child ever runs.
                    Err::<(), _>(Fault::app(Boom("body")))
                })
                .await;
            captured.borrow_mut().push(result.unwrap_err());
            Ok(())
        });
    }
    sim.run().unwrap();
    let faults = captured.borrow();
    let boom = faults[0].downcast_ref::<Boom>().expect("body error, unwrapped");
    assert_eq!(boom.0, "body");
    assert!(faults[0].concurrent().is_none());
}

#[test]
fn child_only_failure_raises_concurrent() {
    init_test_logging();
    let captured: Recorder<Fault> = recorder();
    let mut sim = Simulation::new();
    {
        let captured = captured.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let result = s
                .scope(move |scope| async move {
                    scope.spawn::<(), _, _>(|_c: Sim| async move {
                        Err(Fault::app(Boom("child")))
                    });
                    Ok(())
                })
                .await;
            captured.borrow_mut().push(result.unwrap_err());
            Ok(())
        });
    }
    sim.run().unwrap();
    let faults = captured.borrow();
    let concurrent = faults[0].concurrent().expect("aggregated child failure");
    assert!(concurrent.matches(&TypeSet::exact().require::<Boom>()));
}

// ============================================================================
// Open-question pins
// ============================================================================

#[test]
fn until_does_not_mask_cancellation() {
    init_test_logging();
    let mut sim = Simulation::new();
    let worker = sim.spawn::<(), _, _>(|s| async move {
        let body_sim = s.clone();
        s.until(s.delay(5.0), move |_scope| async move {
            body_sim.eternity().await
        })
        .await?;
        Ok(())
    });
    sim.spawn::<(), _, _>(move |s| async move {
        s.sleep(5.0).await?;
        worker.cancel();
        let outcome = worker.join(&s).await;
        // The guard fires at the same instant, but the task's own
        // cancellation outranks the scope interrupt.
        assert!(matches!(outcome, Err(Fault::Cancelled(_))));
        Ok(())
    });
    sim.run().unwrap();
}

#[test]
fn nested_concurrent_is_not_auto_flattened() {
    init_test_logging();
    let captured: Recorder<Fault> = recorder();
    let mut sim = Simulation::new();
    {
        let captured = captured.clone();
        sim.spawn::<(), _, _>(move |s| async move {
            let result = s
                .scope(move |outer| async move {
                    outer.spawn::<(), _, _>(|c: Sim| async move {
                        c.scope(|inner| async move {
                            inner.spawn::<(), _, _>(|_g: Sim| async move {
                                Err(Fault::app(Boom("deep")))
                            });
                            Ok(())
                        })
                        .await
                    });
                    Ok(())
                })
                .await;
            captured.borrow_mut().push(result.unwrap_err());
            Ok(())
        });
    }
    sim.run().unwrap();
    let faults = captured.borrow();
    let outer = faults[0].concurrent().expect("outer aggregate");
    assert!(outer.contains::<Concurrent>());
    assert!(!outer.contains::<Boom>());
    let flat = outer.flattened();
    assert!(flat.contains::<Boom>());
    assert!(!flat.contains::<Concurrent>());
}

// ============================================================================
// Fatal faults
// ============================================================================

#[test]
fn exit_supersedes_aggregation_and_stops_the_kernel() {
    init_test_logging();
    let mut sim = Simulation::new();
    sim.spawn::<(), _, _>(|s| async move { s.sleep(100.0).await });
    sim.spawn::<(), _, _>(|s| async move {
        s.sleep(1.0).await?;
        Err(Fault::exit("abandon ship"))
    });
    let err = sim.run().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(sim.now().as_f64(), 1.0);
}

// ============================================================================
// Root aggregation
// ============================================================================

#[test]
fn root_failures_surface_as_concurrent() {
    init_test_logging();
    let mut sim = Simulation::new();
    sim.spawn::<(), _, _>(|_s| async move { Err(Fault::app(Boom("root"))) });
    sim.spawn::<(), _, _>(|s| async move { s.sleep(1.0).await });
    let err = sim.run().unwrap_err();
    let concurrent = err.concurrent().expect("root failures aggregate");
    assert!(concurrent.matches(&TypeSet::exact().require::<Boom>()));
}
