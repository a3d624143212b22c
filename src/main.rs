fn main() -> anyhow::Result<()> {
    posm_map_reader_lib::run()?;
    Ok(())
}
