use clap::CommandFactory;
use clap_complete::Shell;
use galley_core::CoreError;

#[allow(clippy::unnecessary_wraps)]
pub fn run<C: CommandFactory>(shell: Shell) -> Result<(), CoreError> {
    clap_complete::generate(shell, &mut C::command(), "galley", &mut std::io::stdout());
    Ok(())
}
