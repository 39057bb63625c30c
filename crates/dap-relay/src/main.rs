fn main() -> miette::Result<()> {
    dap_relay::start()
}
