//! `stevedore version` command.

pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    println!("stevedore {}", stevedore_mirror::VERSION);
    Ok(())
}
