#![no_std]
#![no_main]

use core::cell::RefCell;
use core::convert::Infallible;

use defmt::{debug, info, trace, unwrap};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::time::Hertz;
use embassy_stm32::{bind_interrupts, i2s, interrupt, peripherals, timer, usb};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use embassy_usb::driver::Driver;
use static_cell::StaticCell;
use usb_audio_i2s::app::{AudioBackend, Controller};
use usb_audio_i2s::feedback::FrameTick;
use usb_audio_i2s::pump::{Half, HalfConsumed, OutputBuffer, Pump};
use usb_audio_i2s::uac1::{self, Speaker};
use usb_audio_i2s::*;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
});

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;
type StreamEndpoint = <UsbDriver as Driver<'static>>::EndpointOut;
type FeedbackEndpoint = <UsbDriver as Driver<'static>>::EndpointIn;

static CONFIG: DeviceConfig = DeviceConfig::new();
static SESSION: Session<'static> = Session::new(&CONFIG);

static TIMER: Mutex<CriticalSectionRawMutex, RefCell<Option<timer::low_level::Timer<'static, peripherals::TIM2>>>> =
    Mutex::new(RefCell::new(None));

/// Starts (`true`) or stops (`false`) the I2S output.
static OUTPUT_SIGNAL: Signal<ThreadModeRawMutex, bool> = Signal::new();

static OUTPUT_BUFFER: OutputBuffer<HALF_BUFFER_SAMPLE_COUNT> = OutputBuffer::new();

// The DMA ring buffer holds two output buffers, so that a full half can always be written.
const DMA_BUFFER_SAMPLE_COUNT: usize = 2 * OUTPUT_BUFFER_SAMPLE_COUNT;
static DMA_BUFFER: StaticCell<[u16; DMA_BUFFER_SAMPLE_COUNT]> = StaticCell::new();

#[allow(unused)]
struct I2sResources {
    i2s: peripherals::SPI3,

    ck: peripherals::PC10,
    sd: peripherals::PC12,
    ws: peripherals::PA4,
    mck: peripherals::PC7,
    dma: peripherals::DMA1_CH5,
    dma_buf: &'static mut [u16],
}

fn new_i2s(resources: &mut I2sResources) -> i2s::I2S<'_, u16> {
    let mut config = i2s::Config::default();
    config.format = i2s::Format::Data16Channel16;
    config.master_clock = true;

    i2s::I2S::new_txonly(
        &mut resources.i2s,
        &mut resources.sd,
        &mut resources.ws,
        &mut resources.ck,
        &mut resources.mck,
        &mut resources.dma,
        resources.dma_buf,
        Hertz(SAMPLE_RATE_HZ),
        config,
    )
}

/// Board side of the audio path: I2S output, DAC reset line and indicator LEDs.
struct Board {
    dac_reset: Output<'static>,
    led_usb: Output<'static>,
    led_playback: Output<'static>,
    led_mute: [Output<'static>; INPUT_CHANNEL_COUNT],
}

impl AudioBackend for Board {
    type Error = Infallible;

    async fn start_output(&mut self) -> Result<(), Infallible> {
        self.led_playback.set_high();
        OUTPUT_SIGNAL.signal(true);
        Ok(())
    }

    async fn stop_output(&mut self) -> Result<(), Infallible> {
        OUTPUT_SIGNAL.signal(false);
        self.led_playback.set_low();
        Ok(())
    }

    async fn start_codec(&mut self) -> Result<(), Infallible> {
        // Let the output clocks settle, before the DAC leaves reset.
        Timer::after_millis(1).await;
        self.dac_reset.set_high();
        Ok(())
    }

    async fn stop_codec(&mut self) -> Result<(), Infallible> {
        self.dac_reset.set_low();
        Ok(())
    }

    async fn set_mute(&mut self, is_muted: [bool; 2]) -> Result<(), Infallible> {
        for (led, muted) in self.led_mute.iter_mut().zip(is_muted) {
            led.set_level(muted.into());
        }
        Ok(())
    }

    async fn set_volume(&mut self, volume_8q8_db: [i16; 2]) -> Result<(), Infallible> {
        debug!("Volume: {} / {} (8q8 dB)", volume_8q8_db[0], volume_8q8_db[1]);
        Ok(())
    }

    async fn usb_state(&mut self, configured: bool) -> Result<(), Infallible> {
        self.led_usb.set_level(configured.into());
        Ok(())
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb_device: embassy_usb::UsbDevice<'static, UsbDriver>) {
    usb_device.run().await;
}

#[embassy_executor::task]
async fn feedback_task(endpoint: FeedbackEndpoint) {
    usb_audio::feedback_loop(&SESSION, endpoint).await;
}

#[embassy_executor::task]
async fn streaming_task(endpoint: StreamEndpoint) {
    usb_audio::streaming_loop(&SESSION, endpoint).await;
}

#[embassy_executor::task]
async fn control_task(board: Board) {
    let mut controller = Controller::new(&SESSION, board);
    controller.run().await;
}

#[embassy_executor::task]
async fn pump_task() {
    let mut pump = Pump::new(&SESSION, &OUTPUT_BUFFER);
    pump.run().await;
}

/// Streams the output double buffer to the DAC, while playback is active.
///
/// Every write completes, when the DMA has consumed enough of its ring buffer. At that point, the written
/// half was handed over, and the pump refills it while the other half is written.
async fn stream_output(i2s: &mut i2s::I2S<'_, u16>) {
    let mut half = Half::First;

    loop {
        let samples = OUTPUT_BUFFER.half(half);
        if i2s.write(&samples).await.is_err() {
            info!("I2S write failed");
            return;
        }

        SESSION.half_consumed(HalfConsumed {
            half,
            sample_count: HALF_BUFFER_SAMPLE_COUNT,
        });

        half = half.other();
    }
}

#[embassy_executor::task]
async fn output_task(mut i2s_resources: I2sResources) {
    loop {
        // Wait for the start request.
        while !OUTPUT_SIGNAL.wait().await {}

        info!("Start I2S");
        let mut i2s_dac = new_i2s(&mut i2s_resources);
        i2s_dac.clear();
        _ = i2s_dac.write_immediate(&OUTPUT_BUFFER.half(Half::First)).await;
        i2s_dac.start();

        let stop = async { while OUTPUT_SIGNAL.wait().await {} };
        if let Either::Second(()) = select(stop, stream_output(&mut i2s_dac)).await {
            // Keep the output down, until the next start request.
            while OUTPUT_SIGNAL.wait().await {}
        }

        info!("Stop I2S");
        i2s_dac.stop().await;
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Hi.");

    let mut peripheral_config = embassy_stm32::Config::default();
    {
        // Uses an 8 MHz external oscillator.
        use embassy_stm32::rcc::*;
        peripheral_config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        peripheral_config.rcc.sys = Sysclk::PLL1_P;

        peripheral_config.rcc.ahb_pre = AHBPrescaler::DIV1;
        peripheral_config.rcc.apb1_pre = APBPrescaler::DIV4;
        peripheral_config.rcc.apb2_pre = APBPrescaler::DIV2;

        peripheral_config.rcc.pll_src = PllSource::HSE;
        peripheral_config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV8,
            mul: PllMul::MUL336,
            divp: Some(PllPDiv::DIV2),
            divq: Some(PllQDiv::DIV7),
            divr: None,
        });

        // I2S clock of 98.33 MHz yields a master clock of 12.29 MHz (256 fs at ~48014 Hz).
        peripheral_config.rcc.plli2s = Some(Pll {
            prediv: PllPreDiv::DIV8,
            mul: PllMul::MUL295,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV3),
        });
    }
    let p = embassy_stm32::init(peripheral_config);

    debug!("USB packet size is {} byte", USB_MAX_PACKET_SIZE);
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    let config_descriptor = CONFIG_DESCRIPTOR.init([0; 256]);

    static BOS_DESCRIPTOR: StaticCell<[u8; 32]> = StaticCell::new();
    let bos_descriptor = BOS_DESCRIPTOR.init([0; 32]);

    const CONTROL_BUF_SIZE: usize = 64;
    static CONTROL_BUF: StaticCell<[u8; CONTROL_BUF_SIZE]> = StaticCell::new();
    let control_buf = CONTROL_BUF.init([0; CONTROL_BUF_SIZE]);

    static EP_OUT_BUFFER: StaticCell<[u8; FEEDBACK_PACKET_SIZE + CONTROL_BUF_SIZE + USB_MAX_PACKET_SIZE]> =
        StaticCell::new();
    let ep_out_buffer = EP_OUT_BUFFER.init([0u8; FEEDBACK_PACKET_SIZE + CONTROL_BUF_SIZE + USB_MAX_PACKET_SIZE]);

    static STATE: StaticCell<uac1::State> = StaticCell::new();
    let state = STATE.init(uac1::State::new());

    // Create the driver, from the HAL.
    let mut usb_config = usb::Config::default();
    usb_config.vbus_detection = false;

    let usb_driver = usb::Driver::new_fs(p.USB_OTG_FS, Irqs, p.PA12, p.PA11, ep_out_buffer, usb_config);

    // Basic USB device configuration
    let mut config = embassy_usb::Config::new(0x1209, 0xaf04);
    config.manufacturer = Some("elagil");
    config.product = Some("usb-audio-i2s");

    // Required for windows compatibility.
    config.device_class = 0xEF;
    config.device_sub_class = 0x02;
    config.device_protocol = 0x01;
    config.composite_with_iads = true;

    let mut builder = embassy_usb::Builder::new(
        usb_driver,
        config,
        config_descriptor,
        bos_descriptor,
        &mut [], // no msos descriptors
        control_buf,
    );

    // Create the speaker function, which also registers the control plane.
    let speaker = Speaker::new(&mut builder, state, &SESSION);

    // Build and run the USB device
    let usb_device = builder.build();

    let dma_buffer = DMA_BUFFER.init([0x00_u16; DMA_BUFFER_SAMPLE_COUNT]);
    let i2s_resources = I2sResources {
        i2s: p.SPI3,
        ck: p.PC10,
        sd: p.PC12,
        ws: p.PA4,
        mck: p.PC7,
        dma: p.DMA1_CH5,
        dma_buf: dma_buffer,
    };

    let board = Board {
        dac_reset: Output::new(p.PD4, Level::Low, Speed::Low),
        led_usb: Output::new(p.PD13, Level::Low, Speed::Low),
        led_playback: Output::new(p.PD15, Level::Low, Speed::Low),
        led_mute: [
            Output::new(p.PD12, Level::Low, Speed::Low),
            Output::new(p.PD14, Level::Low, Speed::Low),
        ],
    };

    // The I2S master clock (looped back to TIM2_ETR on PA5) clocks the counter, and every USB SOF
    // captures its value.
    {
        use embassy_stm32::pac;

        pac::GPIOA.moder().modify(|w| w.set_moder(5, pac::gpio::vals::Moder::ALTERNATE));
        pac::GPIOA.afr(0).modify(|w| w.set_afr(5, 1));
    }

    let mut tim2 = timer::low_level::Timer::new(p.TIM2);
    tim2.set_trigger_source(timer::low_level::TriggerSource::ITR1);

    // External clock mode 2 (ETR).
    tim2.regs_gp32().smcr().modify(|w| w.set_ece(true));

    const CHANNEL: timer::Channel = timer::Channel::Ch1;
    tim2.set_input_ti_selection(CHANNEL, timer::low_level::InputTISelection::TRC);
    tim2.set_input_capture_prescaler(CHANNEL, 0);

    // Reset all interrupt flags.
    tim2.regs_gp32().sr().write(|r| r.0 = 0);

    // Enable routing of the USB OTG FS SOF to ITR1.
    tim2.regs_gp32().or().write(|r| *r = 0b10 << 10);

    tim2.enable_channel(CHANNEL, true);
    tim2.enable_input_interrupt(CHANNEL, true);

    tim2.start();

    TIMER.lock(|p| p.borrow_mut().replace(tim2));

    unsafe {
        cortex_m::peripheral::NVIC::unmask(interrupt::TIM2);
    }

    // Launch USB audio tasks.
    unwrap!(spawner.spawn(usb_task(usb_device)));
    unwrap!(spawner.spawn(streaming_task(speaker.stream)));
    unwrap!(spawner.spawn(feedback_task(speaker.feedback)));

    // Launch the audio output and its control.
    unwrap!(spawner.spawn(pump_task()));
    unwrap!(spawner.spawn(output_task(i2s_resources)));
    unwrap!(spawner.spawn(control_task(board)));
}

#[interrupt]
fn TIM2() {
    TIMER.lock(|timer| {
        let timer = timer.borrow();
        let Some(timer) = timer.as_ref() else {
            return;
        };
        let regs = timer.regs_gp32();

        let status = regs.sr().read();

        const CHANNEL_INDEX: usize = 0;
        let tick = FrameTick {
            counter: regs.ccr(CHANNEL_INDEX).read(),
            triggered: status.ccif(CHANNEL_INDEX),
        };

        // Clear all interrupt flags.
        regs.sr().write(|r| r.0 = 0);

        trace!("Frame tick at {}", tick.counter);
        SESSION.on_frame_tick(tick);
    });
}
