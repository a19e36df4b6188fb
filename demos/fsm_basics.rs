//! # Example: FSM Basics
//!
//! A small job-runner state machine:
//! - `Submit` picks between `Queued` and `Rejected` inside its action
//! - `Run` simulates work and lands in `Done`
//! - `Abort` is accepted from any state
//!
//! Transitions are published on the bus and printed by a listener.
//!
//! Run with: `cargo run --example fsm_basics`

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use clustervisor::fsm::{StateMachine, Transit, action};
use clustervisor::{Bus, EventKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Job {
    Idle,
    Queued,
    Rejected,
    Running,
    Done,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Cmd {
    Submit,
    Run,
    Finish,
    Abort,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bus = Bus::new(64);
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            if ev.kind == EventKind::StateChanged {
                println!(
                    "[{}] {} --{}--> {}",
                    ev.fsm.as_deref().unwrap_or("?"),
                    ev.from.as_deref().unwrap_or("?"),
                    ev.event.as_deref().unwrap_or("?"),
                    ev.to.as_deref().unwrap_or("?"),
                );
            }
        }
    });

    let capacity = Arc::new(AtomicU32::new(1));
    let builder = StateMachine::builder("jobs");
    let events = builder.sender();

    let fsm = builder
        .initial(Job::Idle)
        .terminal([Job::Done, Job::Aborted, Job::Rejected])
        .transition_with(
            Job::Idle,
            Cmd::Submit,
            [Job::Queued, Job::Rejected],
            action(move |t: Transit<Job, Cmd>| {
                let capacity = Arc::clone(&capacity);
                async move {
                    let admitted = capacity
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
                        .is_ok();
                    t.go_to(if admitted { Job::Queued } else { Job::Rejected })?;
                    Ok(())
                }
            }),
        )
        .transition_with(
            Job::Queued,
            Cmd::Run,
            [Job::Running],
            action(move |_t| {
                let events = events.clone();
                async move {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        events.fire(Cmd::Finish);
                    });
                    Ok(())
                }
            }),
        )
        .transition(Job::Running, Cmd::Finish, [Job::Done])
        .any_state(Cmd::Abort, [Job::Aborted])
        .notify(bus.clone())
        .build()?;

    fsm.fire(Cmd::Submit);
    fsm.fire(Cmd::Run);
    println!("accepted from {:?}: {:?}", fsm.current_state(), fsm.accepted_events());

    fsm.await_termination().await;
    println!("final state: {:?}", fsm.current_state());
    fsm.shutdown().await?;

    drop(bus);
    printer.abort();
    Ok(())
}
