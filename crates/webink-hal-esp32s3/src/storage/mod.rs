pub mod rtc_state;
