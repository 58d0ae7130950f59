//! Full-stack scenarios: session and simulated coprocessor at opposite ends
//! of a loopback link, sharing one cooperative scheduler.

use std::cell::RefCell;
use std::rc::Rc;

use megalink::link::{LoopbackConfig, LoopbackLink};
use megalink::session::{
    Command, Session, SessionError, SimCoprocessor, SockState, CMD_CAPACITY,
};
use megalink::task::InstantTicks;

type SimSession = Session<LoopbackLink, InstantTicks>;

fn stack() -> (SimSession, Rc<RefCell<SimCoprocessor>>) {
    stack_with(LoopbackConfig::default())
}

fn stack_with(config: LoopbackConfig) -> (SimSession, Rc<RefCell<SimCoprocessor>>) {
    let (near, far) = LoopbackLink::pair_with(config);
    let sim = Rc::new(RefCell::new(
        SimCoprocessor::new(far).expect("sim should start"),
    ));
    let mut session = Session::new(near, InstantTicks::default());
    session.init().expect("session should init");
    let task_sim = Rc::clone(&sim);
    session
        .scheduler_mut()
        .user_set(Some(Box::new(move |handle| {
            if task_sim.borrow_mut().service() {
                handle.post(false);
            }
        })));
    (session, sim)
}

#[test]
fn version_round_trip_over_full_stack() {
    let (mut session, _sim) = stack();
    let version = session.version().expect("version should succeed");
    assert_eq!(version.to_string(), "1.5.0-std");
}

#[test]
fn command_timeout_is_exact_and_recoverable() {
    let (mut session, sim) = stack();
    sim.borrow_mut().set_silent(true);

    let err = session
        .execute_command(&Command::Version, 10)
        .expect_err("silent peer must time out");
    assert!(matches!(err, SessionError::RecvTimeout));
    assert_eq!(session.scheduler().ticks().elapsed(), 10);

    // The session recovers without re-initialization.
    sim.borrow_mut().set_silent(false);
    let version = session.version().expect("session should recover");
    assert_eq!(version.variant, "std");
}

#[test]
fn unsolicited_data_reaches_callback_during_command() {
    let (mut session, sim) = stack();
    session
        .tcp_connect(1, "peer.example.com", 5000)
        .expect("connect should succeed");

    let seen: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
    let sink = Rc::clone(&seen);
    session.set_data_callback(Some(Box::new(move |frame| {
        sink.borrow_mut().push(frame.payload.to_vec());
    })));

    sim.borrow_mut().push_data(1, b"server push");
    let status = session.sys_status().expect("status should succeed");
    assert_eq!(status.flags, 0);

    assert_eq!(seen.borrow().as_slice(), &[b"server push".to_vec()]);
}

#[test]
fn oversize_frame_arrives_in_partial_pieces() {
    let (mut session, sim) = stack_with(LoopbackConfig {
        capacity: 8192,
        tx_burst: 64,
    });
    session
        .tcp_connect(1, "peer.example.com", 5000)
        .expect("connect should succeed");

    let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
    sim.borrow_mut().push_data(1, &payload);

    let mut collected = Vec::new();
    while collected.len() < payload.len() {
        let frame = session.recv_data(60).expect("piece should arrive");
        assert_eq!(frame.channel, 1);
        collected.extend_from_slice(&frame.payload);
    }
    assert_eq!(collected, payload);
    // First delivery fills the whole receive buffer.
    assert!(payload.len() > CMD_CAPACITY);
}

#[test]
fn association_then_echo_over_tcp() {
    let (mut session, sim) = stack();
    sim.borrow_mut().set_join_delay(45);

    session.ap_join(0).expect("join should be accepted");
    session.assoc_wait(600).expect("association should finish");

    session
        .tcp_connect(2, "echo.example.com", 7)
        .expect("connect should succeed");
    assert_eq!(
        session.sock_status(2).expect("status should succeed"),
        SockState::Connected
    );

    session
        .send_data(2, b"round trip", 60)
        .expect("send should succeed");
    let echoed = session.recv_data(60).expect("echo should arrive");
    assert_eq!(echoed.payload.as_ref(), b"round trip");

    session.close(2).expect("close should succeed");
    assert_eq!(
        session.sock_status(2).expect("status should succeed"),
        SockState::Closed
    );
}
