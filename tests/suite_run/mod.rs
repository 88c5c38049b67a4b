//! BDD harness for suite orchestration.

mod bdd_steps;
mod scenarios;
mod test_helpers;
