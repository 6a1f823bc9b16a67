//! Torn branches give the same waveforms as the monolithic solve.

mod common;

use approx::assert_relative_eq;
use common::{pi_line_topology, rl_config, rl_topology};
use gridsim_core::simulation::MemorySink;
use gridsim_core::{
    Complex64, DataLogger, Domain, MnaScalar, Simulation, SimulationConfig, SystemTopology,
};

fn run<T: MnaScalar>(
    topology: SystemTopology<T>,
    config: SimulationConfig,
    event: Option<f64>,
    attributes: &[&str],
) -> (MemorySink, u64) {
    let mut sim = Simulation::new("tear", topology, config).unwrap();
    if let Some(time) = event {
        sim.add_switch_event(time, "sw", true).unwrap();
    }
    let sink = MemorySink::new();
    let mut logger = DataLogger::new("log", sink.clone());
    for name in attributes {
        logger.log_attribute(name);
    }
    sim.add_logger(logger).unwrap();
    let summary = sim.run().unwrap();
    (sink, summary.factorizations)
}

fn assert_same_real(a: &MemorySink, b: &MemorySink, attribute: &str) {
    let a = a.real_series(attribute).unwrap();
    let b = b.real_series(attribute).unwrap();
    assert_eq!(a.len(), b.len());
    assert!(!a.is_empty());
    for ((ta, va), (tb, vb)) in a.iter().zip(&b) {
        assert_eq!(ta, tb);
        assert_relative_eq!(va, vb, epsilon = 1e-9, max_relative = 1e-7);
    }
}

#[test]
fn test_torn_inductor_matches_full_solve() {
    let attributes = ["n1.V", "n2.V", "line.i_intf"];
    let (full, _) = run(rl_topology::<f64>(false), rl_config(0.02), Some(0.01), &attributes);

    let mut torn = rl_topology::<f64>(false);
    torn.tear_component("line").unwrap();
    let (tearing, _) = run(torn, rl_config(0.02), Some(0.01), &attributes);

    for attribute in attributes {
        assert_same_real(&full, &tearing, attribute);
    }
}

#[test]
fn test_torn_switch_refactorizes_reduced_system_only() {
    let attributes = ["n2.V", "n3.V"];
    let (full, full_factorizations) =
        run(rl_topology::<f64>(false), rl_config(0.02), Some(0.01), &attributes);
    // Both switch states precomputed up front
    assert_eq!(full_factorizations, 2);

    let mut torn = rl_topology::<f64>(false);
    torn.tear_component("sw").unwrap();
    let (tearing, factorizations) = run(torn, rl_config(0.02), Some(0.01), &attributes);
    // One main matrix, the reduced system at start and after the switch
    assert_eq!(factorizations, 3);

    for attribute in attributes {
        assert_same_real(&full, &tearing, attribute);
    }
}

#[test]
fn test_torn_pi_line_matches_full_solve() {
    let config = SimulationConfig::new()
        .with_domain(Domain::Dp)
        .with_time_step(1e-4)
        .with_final_time(0.005);
    let (full, _) = run::<Complex64>(pi_line_topology(50.0), config.clone(), None, &["n1.V"]);

    let mut torn = pi_line_topology(50.0);
    torn.tear_component("line").unwrap();
    let (tearing, _) = run::<Complex64>(torn, config, None, &["n1.V"]);

    let a = full.series("n1.V").unwrap();
    let b = tearing.series("n1.V").unwrap();
    assert_eq!(a.len(), 50);
    assert_eq!(a.len(), b.len());
    for ((_, x), (_, y)) in a.iter().zip(&b) {
        let (x, y) = (x.as_complex().unwrap(), y.as_complex().unwrap());
        assert_relative_eq!(x.re, y.re, max_relative = 1e-7);
        assert_relative_eq!(x.im, y.im, epsilon = 1e-6);
    }
}

#[test]
fn test_untearable_component_rejected() {
    let mut topology = rl_topology::<f64>(false);
    assert!(topology.tear_component("vs").is_err());
    assert!(topology.tear_component("missing").is_err());
}
