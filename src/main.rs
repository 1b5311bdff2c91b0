use anyhow::Result;

fn main() -> Result<()> {
    modbus_adapter::cli::run()
}
