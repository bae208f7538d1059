#[cfg(feature = "ssr")]
use data_escape_room::config::Config;
#[cfg(feature = "ssr")]
use data_escape_room::dataset::load_column;
#[cfg(feature = "ssr")]
use data_escape_room::stage::STAGES;

/// Prints the expected answer for every stage so the datasets can be checked before a session.
#[cfg(feature = "ssr")]
fn main() {
    let config = Config::from_env().expect("Invalid configuration");
    let mut failed = false;

    for definition in STAGES.iter() {
        match load_column(&config.data_dir, definition) {
            Ok(values) => match definition.aggregate.apply(&values) {
                Some(answer) => println!(
                    "Stage {} ({}): {} rows, answer {}",
                    definition.number,
                    definition.dataset_file,
                    values.len(),
                    answer
                ),
                None => {
                    eprintln!(
                        "Stage {} ({}): column {} is empty",
                        definition.number, definition.dataset_file, definition.column
                    );
                    failed = true;
                }
            },
            Err(e) => {
                eprintln!("Stage {}: {}", definition.number, e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

#[cfg(not(feature = "ssr"))]
fn main() {
    println!("This binary requires the 'ssr' feature to be enabled.");
}
