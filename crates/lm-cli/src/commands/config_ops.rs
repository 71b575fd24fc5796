use std::fs;

pub fn settings_export() {
    print!("{}", lm_core::settings::default_toml());
}

pub fn settings_validate(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    let s = die!(
        lm_core::settings::parse_settings_toml(&content),
        "Error: {}"
    );
    println!(
        "OK: learning.half_life_hours={}, learning.max_pairs={}, loader.worker_threads={}",
        s.learning.half_life_hours, s.learning.max_pairs, s.loader.worker_threads
    );
}
