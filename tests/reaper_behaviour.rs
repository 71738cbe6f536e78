//! Behavioural scenarios for the fleet reapers.

mod reapers;
