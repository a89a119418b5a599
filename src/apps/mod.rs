//! Reference call flows built on the agent machinery.

pub mod car_loan;
