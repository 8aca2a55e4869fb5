pub mod commands;

pub use commands::{
    collect_params, default_data_dir, derive_key, lookup, open_cache, parse_param, run_demo,
    DemoReport, Params,
};
