use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::pipe::Pipe;
use flow_core::clock::Clock;
use flow_core::console::CommandDispatcher;
use flow_core::motion::MotionController;
use flow_core::persistence::{Context, StoreError};
use flow_core::telemetry::{ErrorCode, EventRecorder};

use crate::clock::{BoardClock, BoardInstant};
use crate::hw::{BoardFlash, CoilPair, GpioValveDriver};
use crate::record::FlashStore;
use crate::telemetry;

mod console_task;

/// Bytes buffered between the UART receive path and the dispatcher.
pub const CONSOLE_PIPE_CAPACITY: usize = 256;

pub type ConsolePipe = Pipe<ThreadModeRawMutex, CONSOLE_PIPE_CAPACITY>;
pub type RecordStore = FlashStore<BoardFlash>;
pub type Console = CommandDispatcher<GpioValveDriver<'static>, RecordStore, BoardClock>;

const BOARD_SERIAL: &str = "FLOW-0001";
const BOARD_VERSION: &str = env!("CARGO_PKG_VERSION");

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static CONSOLE_PIPE: ConsolePipe = Pipe::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PA7,
        PA8,
        PA9,
        PA10,
        PA15,
        PB3,
        PB4,
        PB5,
        PB6,
        PB0,
        PB1,
        USART5,
        FLASH,
        ..
    } = hal::init(config);

    let driver = GpioValveDriver::new(
        [
            CoilPair::new(output(PA0), output(PA6)),
            CoilPair::new(output(PA1), output(PA7)),
            CoilPair::new(output(PA2), output(PA8)),
            CoilPair::new(output(PA3), output(PA9)),
            CoilPair::new(output(PA4), output(PA10)),
            CoilPair::new(output(PA5), output(PA15)),
        ],
        [output(PB4), output(PB5), output(PB6)],
        output(PB3),
    );

    let context = match boot_context(BoardFlash::new(Flash::new_blocking(FLASH))) {
        Ok(context) => context,
        Err(err) => {
            let mut events: EventRecorder<BoardInstant, 4> = EventRecorder::new();
            events.record_error(ErrorCode::FailedToInit, BoardClock.now());
            telemetry::drain(&mut events);
            defmt::error!("flow: system record unavailable: {}", err);
            core::future::pending::<()>().await;
            return;
        }
    };

    defmt::info!(
        "flow: boot #{} serial={} state={}",
        context.info().startup_count,
        context.info().serial.as_str(),
        context.state().display_name()
    );

    let console = CommandDispatcher::new(MotionController::new(driver), context, BoardClock);

    spawner
        .spawn(console_task::run(console, &CONSOLE_PIPE, USART5, PB0, PB1))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}

fn output(pin: Peri<'static, impl Pin>) -> Output<'static> {
    Output::new(pin, Level::Low, Speed::Low)
}

fn boot_context(flash: BoardFlash) -> Result<Context<RecordStore>, StoreError> {
    let store = FlashStore::open(flash)?;
    if store.was_blank() {
        defmt::warn!("flow: no saved record, starting fresh");
    }
    Context::boot(store.with_default_identity(BOARD_SERIAL, BOARD_VERSION)?)
}
