use anyhow::Result;

use podlaunch::port::allocate_with_retry;

/// Prints one candidate host port. Nothing is reserved.
pub fn run(min: u16, max: u16, attempts: u32) -> Result<()> {
    let port = allocate_with_retry(min, max, attempts)?;
    println!("{port}");
    Ok(())
}
