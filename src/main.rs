#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() {
    let exit_code = match bgraph::run::run() {
        Ok(code) => code,
        Err(err) => {
            println!("bgraph: error: {}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
