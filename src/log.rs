use crate::stopping_rule::IterationRecord;
use std::time::Duration;

pub fn show_greeting() {
    println!("\nhydrosched - SDDP for hydrothermal scheduling");
    println!("version {}", env!("CARGO_PKG_VERSION"));
}

pub fn input_reading_line(path: &str) {
    println!("\nReading input files from '{path}'");
}

/// Helper function for displaying the greeting data for the training
pub fn training_greeting(
    num_nodes: usize,
    state_dimension: usize,
    cyclic: bool,
    stopping_rules: &[String],
) {
    println!("\n# Training");
    println!("- Nodes: {num_nodes}");
    println!("- State variables: {state_dimension}");
    if cyclic {
        println!("- Policy graph: cyclic");
    }
    for rule in stopping_rules.iter() {
        println!("- Stopping rule: {rule}");
    }
    println!();
}

/// Helper function for displaying the training table header
pub fn training_table_header() {
    println!(
        "{0: ^10} | {1: ^15} | {2: ^14} | {3: ^12} | {4: ^8}",
        "iteration", "lower bound ($)", "simulation ($)", "time (s)", "cuts"
    )
}

/// Helper function for displaying a divider for the training table
pub fn training_table_divider() {
    println!(
        "-------------------------------------------------------------------------"
    )
}

/// Helper function for displaying a row of iteration results for
/// the training table
pub fn training_table_row(record: &IterationRecord) {
    println!(
        "{0: >10} | {1: >15.4} | {2: >14.4} | {3: >12.2} | {4: >8}",
        record.iteration,
        record.lower_bound,
        record.simulation_value,
        record.time.as_millis() as f64 / 1000.0,
        record.total_cuts
    )
}

pub fn training_stopping_reason(reason: &str) {
    println!("\nStopped by: {reason}");
}

pub fn training_duration(time: Duration) {
    println!("Training time: {:.2} s", time.as_millis() as f64 / 1000.0)
}

pub fn cuts_loading_line(path: &str) {
    println!("\nLoading cuts from '{path}', skipping training");
}

/// Helper function for displaying the greeting data for the simulation
pub fn simulation_greeting(num_simulation_scenarios: usize) {
    println!("\n# Simulating");
    println!("- Scenarios: {num_simulation_scenarios}\n");
}

/// Shows the mean cost with the half width of its 95% confidence interval
pub fn simulation_stats(mean: f64, half_width: f64) {
    println!("Expected cost ($): {:.2} +- {:.2}", mean, half_width);
}

pub fn simulation_duration(time: Duration) {
    println!("Simulation time: {:.2} s", time.as_millis() as f64 / 1000.0)
}

pub fn output_generation_line(path: &str) {
    println!("\nWriting outputs to '{path}'");
}

pub fn show_farewell(time: Duration) {
    println!(
        "\nTotal running time: {:.2} s",
        time.as_millis() as f64 / 1000.0
    )
}
