fn main() -> anyhow::Result<()> {
    careconnect_app::app::launch()
}
