//! Assertions over session state

use crate::core_engine::SessionSnapshot;
use crate::core_session::SessionError;
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Ok to be Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Assert the failure is an access-control refusal
pub fn assert_access_failure<T: Debug>(result: Result<T, SessionError>) -> SessionError {
    let err = assert_err(result);
    assert!(err.is_access_failure(), "Expected an access failure, got {:?}", err);
    err
}

/// Assert that every snapshot shows the same document text
pub fn assert_converged(snapshots: &[SessionSnapshot]) {
    let Some(first) = snapshots.first() else {
        return;
    };
    for snapshot in snapshots {
        if snapshot.text != first.text {
            panic!(
                "Replicas diverged: {} has {:?}, {} has {:?}",
                first.local_peer_id, first.text, snapshot.local_peer_id, snapshot.text
            );
        }
    }
}
