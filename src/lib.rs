//! autosweep runs a series of frequency sweep measurements in Room EQ Wizard
//! (REW) without anyone sitting at the keyboard. It talks to REW's HTTP API
//! to check the configuration, watch for warnings and read results back, and
//! drives REW's measurement dialog through the desktop to start each sweep
//! while the matching stimulus plays through the AV receiver.
//!
//! A measurement is a [schedule](schedule) of steps derived from a
//! [configuration](settings::MeasurementConfig): a settings check, an
//! optional microphone centering check, then one sweep per channel per
//! iteration. The [workflow] runs the schedule on a worker thread owned by a
//! [session], retrying sweeps REW complains about and asking the user for
//! help through an [observer] whenever it cannot proceed alone. The
//! [tui] and [console] front ends host the session.
//!
//! Everything that touches the outside world sits behind a trait with a
//! simulated implementation, so a whole measurement can be rehearsed with
//! `autosweep --simulate`.

#![warn(missing_docs)]
pub mod args;
pub mod automation;
pub mod channel;
pub mod console;
pub mod control;
pub mod error;
pub mod observer;
pub mod player;
pub mod rew;
pub mod schedule;
pub mod session;
pub mod settings;
pub mod tui;
pub mod workflow;
