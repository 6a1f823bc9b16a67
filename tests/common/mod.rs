//! Shared topologies for the integration tests.

#![allow(dead_code)]

use gridsim_core::components::{
    Inductor, MnaComponent, PiLine, Resistor, Switch, VoltageSource, VoltageSourceNorton,
};
use gridsim_core::{Complex64, MnaScalar, SimulationConfig, SystemTopology};

pub const SOURCE_VOLTAGE: f64 = 10_000.0;
pub const SOURCE_RESISTANCE: f64 = 1.0;
pub const LOAD: f64 = 1000.0;
/// In parallel with `LOAD` gives 800 Ω
pub const EXTRA_LOAD: f64 = 4000.0;

/// Norton source on n1, 1 H line to n2, 1000 Ω load, and a 4000 Ω load
/// behind switch `sw` on n3.
pub fn rl_topology<T: MnaScalar>(closed: bool) -> SystemTopology<T> {
    let mut topo = SystemTopology::new(50.0);
    let gnd = topo.ground();
    let n1 = topo.add_node("n1").unwrap();
    let n2 = topo.add_node("n2").unwrap();
    let n3 = topo.add_node("n3").unwrap();

    let mut vs = VoltageSourceNorton::new(
        "vs",
        Complex64::new(SOURCE_VOLTAGE, 0.0),
        None,
        SOURCE_RESISTANCE,
    )
    .unwrap();
    vs.connect(&[gnd.clone(), n1.clone()]).unwrap();
    let mut line = Inductor::new("line", 1.0).unwrap();
    line.connect(&[n1, n2.clone()]).unwrap();
    let mut load = Resistor::new("load", LOAD).unwrap();
    load.connect(&[n2.clone(), gnd.clone()]).unwrap();
    let mut sw = Switch::with_resistances("sw", 1e9, 1e-6, closed).unwrap();
    sw.connect(&[n2, n3.clone()]).unwrap();
    let mut extra = Resistor::new("extra_load", EXTRA_LOAD).unwrap();
    extra.connect(&[n3, gnd]).unwrap();

    topo.add_component(vs).unwrap();
    topo.add_component(line).unwrap();
    topo.add_component(load).unwrap();
    topo.add_component(sw).unwrap();
    topo.add_component(extra).unwrap();
    topo
}

/// Ideal source on n0, pi-line to n1, resistive load on n1, with the
/// power-flow voltages of the steady state written to the nodes.
pub fn pi_line_topology(frequency: f64) -> SystemTopology<Complex64> {
    let (r, l, c, load) = (0.5, 0.01, 1e-6, 100.0);
    let v0 = Complex64::new(1000.0, 0.0);
    let omega = 2.0 * std::f64::consts::PI * frequency;
    let z = Complex64::new(r, omega * l);
    let y1 = Complex64::new(1.0 / load, omega * c / 2.0);
    let v1 = v0 / z / (Complex64::new(1.0, 0.0) / z + y1);

    let mut topo = SystemTopology::new(frequency);
    let gnd = topo.ground();
    let n0 = topo.add_node("n0").unwrap();
    let n1 = topo.add_node("n1").unwrap();
    n0.set_initial_voltage(v0).unwrap();
    n1.set_initial_voltage(v1).unwrap();

    let mut vs = VoltageSource::new("vs", v0, None).unwrap();
    vs.connect(&[gnd.clone(), n0.clone()]).unwrap();
    let mut line = PiLine::new("line", r, l, c, None).unwrap();
    line.connect(&[n0, n1.clone()]).unwrap();
    let mut res = Resistor::new("load", load).unwrap();
    res.connect(&[n1, gnd]).unwrap();

    topo.add_component(vs).unwrap();
    topo.add_component(line).unwrap();
    topo.add_component(res).unwrap();
    topo
}

pub fn rl_config(final_time: f64) -> SimulationConfig {
    SimulationConfig::new()
        .with_time_step(1e-4)
        .with_final_time(final_time)
        .with_init_from_powerflow(false)
}
