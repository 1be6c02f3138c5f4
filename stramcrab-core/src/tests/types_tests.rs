use super::*;

#[test]
fn test_window_id_halves() {
    let id = WindowId::new(0x0afe_babe, 7);
    assert_eq!(id.as_u64(), 0x0afe_babe_0000_0007);
    assert_eq!(id.base_seconds(), 0x0afe_babe);
    assert_eq!(id.sequence(), 7);
}

#[test]
fn test_window_id_ordering_follows_base_then_sequence() {
    let late_in_old_base = WindowId::new(10, MAX_SEQ);
    let first_in_new_base = WindowId::new(11, 0);
    assert!(late_in_old_base < first_in_new_base);
    assert!(WindowId::new(10, 1) < WindowId::new(10, 2));
}

#[test]
fn test_next_in_base_stops_at_max_seq() {
    assert_eq!(
        WindowId::new(3, 41).next_in_base(),
        Some(WindowId::new(3, 42))
    );
    assert_eq!(WindowId::new(3, MAX_SEQ).next_in_base(), None);
}

#[test]
fn test_window_id_display_is_hex() {
    let id = WindowId::from(0x5556_38de_0000_007f);
    assert_eq!(id.to_string(), "0x555638de0000007f");
}

#[test]
fn test_control_signal_window_id() {
    let reset = ControlSignal::Reset {
        base_seconds: 9,
        interval_millis: 500,
    };
    assert!(reset.is_reset());
    assert_eq!(reset.window_id(), WindowId::new(9, 0));

    let end = ControlSignal::End {
        window_id: WindowId::new(9, 4),
    };
    assert!(!end.is_reset());
    assert_eq!(end.window_id(), WindowId::new(9, 4));
    assert_eq!(end.to_string(), "End(0x0000000900000004)");
}
