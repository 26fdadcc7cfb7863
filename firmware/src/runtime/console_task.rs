use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use flow_core::console::LineBuffer;
use static_cell::StaticCell;

use super::{Console, ConsolePipe};
use crate::{status, telemetry};

const CONSOLE_UART_BAUD: u32 = 9_600;
const UART_BUFFER_SIZE: usize = 128;
const INGRESS_CHUNK: usize = 32;

static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    mut console: Console,
    pipe: &'static ConsolePipe,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        config,
    )
    .expect("failed to initialize console UART");

    let (mut uart_tx, mut uart_rx) = uart.split();

    let ingress = async move {
        let mut chunk = [0u8; INGRESS_CHUNK];
        loop {
            match uart_rx.read(&mut chunk).await {
                Ok(count) if count > 0 => {
                    // Never wait on the consumer; input past capacity is lost.
                    let accepted = pipe.try_write(&chunk[..count]).unwrap_or(0);
                    status::record_received(count, accepted);
                }
                Ok(_) => {}
                Err(_) => {
                    defmt::warn!("console: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    let dispatch = async move {
        let mut line = LineBuffer::new();
        let mut chunk = [0u8; INGRESS_CHUNK];
        loop {
            let count = pipe.read(&mut chunk).await;
            for &byte in &chunk[..count] {
                if !line.ingest(byte) {
                    continue;
                }

                let reply = console.parse_line(&mut line);
                status::record_reply(reply.is_ack());
                if let Some(error) = &reply.error {
                    defmt::debug!("console: rejected line: {}", defmt::Display2Format(error));
                }
                if uart_tx.write_all(&reply.to_bytes()).await.is_err()
                    || uart_tx.flush().await.is_err()
                {
                    defmt::warn!("console: UART write error");
                }
                telemetry::drain(console.events_mut());
            }

            if let Some(dropped) = status::take_new_drops() {
                defmt::warn!("console: dropped {} input bytes", dropped);
            }
        }
    };

    join(ingress, dispatch).await;
    loop {
        core::future::pending::<()>().await;
    }
}
