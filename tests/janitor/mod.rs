//! Fixtures, steps, and scenarios for janitor behaviour.

mod bdd_steps;
mod scenarios;
mod test_helpers;
