use std::thread::sleep;
use std::time::Duration;

use crate::time::get_duration_since_epoch;
use crate::time::millis_since;
use crate::time::timestamp_millis;

#[test]
fn test_timestamp_millis() {
    let t1 = timestamp_millis();
    sleep(Duration::from_millis(10));
    let t2 = timestamp_millis();

    // Ensure time is moving forward
    assert!(t2 > t1);
}

#[test]
fn test_get_duration_since_epoch() {
    let duration = get_duration_since_epoch();
    assert!(duration.as_secs() > 1609459200); // Greater than 2021-01-01
}

#[test]
fn test_millis_since_saturates_for_future_timestamps() {
    let future = timestamp_millis() + 60_000;
    assert_eq!(millis_since(future), 0);

    let past = timestamp_millis() - 1_000;
    assert!(millis_since(past) >= 1_000);
}
