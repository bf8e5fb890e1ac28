//! Cooperative main loop.
//!
//! ```text
//! start:  hal.init()  →  core.begin()  →  sketch.setup()
//! step:   core.process()  →  sketch.run_loop()
//! run:    loop { step }
//! ```
//!
//! Single-threaded. The HAL is owned here and lent to the protocol core and
//! the sketch one call at a time, so nothing else can reach it reentrantly.

use crate::features::BUILD;
use crate::hal::{Hal, InitError};
use crate::hw_debug;

/// Protocol core (routing, transport, signing). Lives outside this crate.
pub trait Core<H: Hal> {
    /// Called once after the HAL is up.
    fn begin(&mut self, hal: &mut H);

    /// One round of protocol work. Must not block except in `Hal::sleep*`.
    fn process(&mut self, hal: &mut H);
}

/// User application.
pub trait Sketch<H: Hal> {
    fn setup(&mut self, _hal: &mut H) {}

    fn run_loop(&mut self, hal: &mut H);
}

/// HAL, protocol core and sketch wired together.
pub struct Firmware<H, C, S> {
    hal: H,
    core: C,
    sketch: S,
}

impl<H, C, S> Firmware<H, C, S>
where
    H: Hal,
    C: Core<H>,
    S: Sketch<H>,
{
    /// Bring the HAL up, then start the core and the sketch.
    ///
    /// Fails without touching the core or the sketch if `init` fails.
    pub fn start(mut hal: H, mut core: C, mut sketch: S) -> Result<Self, InitError> {
        hal.init()?;

        hw_debug!(&mut hal, "{} {}\n", crate::VERSION_STRING, BUILD.node_type());

        core.begin(&mut hal);
        sketch.setup(&mut hal);

        Ok(Self { hal, core, sketch })
    }

    /// One loop iteration.
    pub fn step(&mut self) {
        self.core.process(&mut self.hal);
        self.sketch.run_loop(&mut self.hal);
    }

    pub fn run(mut self) -> ! {
        loop {
            self.step();
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn sketch(&self) -> &S {
        &self.sketch
    }

    pub fn into_parts(self) -> (H, C, S) {
        (self.hal, self.core, self.sketch)
    }
}
