#![allow(dead_code)]

use ms_ocp::{Bounds, OcpConfig, OcpModel};
use ms_symbolic::{DaeVariables, ResidualOptions, SymbolicModel};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// xdot = -x + 0.5 x^2 + u + 0.5 z, ldot = x^2 + 3 u^2, 0 = z + exp(z) - 1 + x;
/// minimize l at the final time.
pub fn simple_dae() -> OcpModel {
    simple_dae_with(ResidualOptions::default())
}

pub fn simple_dae_with(options: ResidualOptions) -> OcpModel {
    let mut model = SymbolicModel::new();
    let v = DaeVariables::declare(&mut model, &["x", "l"], &["z"], &["u"], &[]);
    let (x, l, z, u) = (&v.x[0], &v.x[1], &v.z[0], &v.u[0]);
    let dynamics = model
        .dae_function(
            "simple_dae",
            &v,
            vec![
                -x + 0.5 * x.powi(2) + u + 0.5 * z,
                x.powi(2) + 3.0 * u.powi(2),
                z + z.exp() - 1.0 + x,
            ],
            1,
        )
        .unwrap();
    let cost = model.dae_function("mayer", &v, vec![l.clone()], 1).unwrap();
    OcpModel::new(&mut model, dynamics, cost, options).unwrap()
}

pub fn reference_config() -> OcpConfig {
    OcpConfig {
        start_time: 0.0,
        final_time: 5.0,
        node_count: 20,
        kkt_tolerance: 1e-5,
        ..OcpConfig::default()
    }
}

/// x(0) = 1, l(0) = 0, z(0) free.
pub fn reference_bounds() -> Bounds {
    Bounds::new(
        vec![1.0, 0.0, f64::NEG_INFINITY],
        vec![1.0, 0.0, f64::INFINITY],
    )
}
