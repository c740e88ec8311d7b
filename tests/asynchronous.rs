mod common;

use common::{pattern, Event, NoDelay, Sim, SimSpi, SimWp};
use embassy_futures::block_on;
use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use pretty_assertions::assert_eq;
use spinor25::{
    asynchronous::{AsyncBY25D40, AsyncFlash, AsyncW25Q80},
    error::Error,
    register::ProtectionSize,
    BusyPoll,
};

type Dut = AsyncW25Q80<SimSpi, SimWp, NoDelay>;

fn flash(sim: &Sim) -> Dut {
    AsyncFlash::new(sim.spi(), sim.wp(), NoDelay::default())
}

#[test]
fn init_checks_the_ids() {
    let sim = Sim::w25q80();
    sim.state().status = 0b0010_0000;
    block_on(Dut::init(sim.spi(), sim.wp(), NoDelay::default())).unwrap();
    assert_eq!(sim.state().status, 0);

    let sim = Sim::by25d40();
    let res = block_on(Dut::init(sim.spi(), sim.wp(), NoDelay::default()));
    assert!(matches!(
        res,
        Err(Error::UnexpectedDevice {
            manufacturer: 0x68,
            device: 0x12
        })
    ));
}

#[test]
fn write_then_read_back() {
    block_on(async {
        let sim = Sim::w25q80();
        sim.fill(0x2100, &[0; 8]);
        let mut memory = flash(&sim);
        let data = pattern(700, 4);

        memory.write_bytes(0x20F0, &data).await.unwrap();

        let mut buff = vec![0; data.len()];
        memory.read(0x20F0, &mut buff).await.unwrap();
        assert_eq!(buff, data);
        assert_eq!(sim.sector_erases(), vec![0x2000]);
        assert_eq!(sim.bursts()[0], (0x20F0, 16));
        assert_eq!(sim.violations(), Vec::<String>::new());
    });
}

#[test]
fn matches_the_blocking_command_sequence() {
    let blocking = Sim::w25q80();
    let asynchronous = Sim::w25q80();
    for sim in [&blocking, &asynchronous] {
        sim.fill(0x0FF0, &[0; 32]);
    }
    let data = pattern(300, 8);

    let mut memory =
        spinor25::blocking::W25Q80::new(blocking.spi(), blocking.wp(), NoDelay::default());
    memory.write_bytes(0x0FF8, &data).unwrap();
    memory.set_protection_size(ProtectionSize::Kb64).unwrap();

    block_on(async {
        let mut memory = flash(&asynchronous);
        memory.write_bytes(0x0FF8, &data).await.unwrap();
        memory.set_protection_size(ProtectionSize::Kb64).await.unwrap();
    });

    assert_eq!(asynchronous.events(), blocking.events());
    assert_eq!(asynchronous.state().transactions, blocking.state().transactions);
}

#[test]
fn single_byte_into_programmed_page_erases_the_sector() {
    block_on(async {
        let sim = Sim::w25q80();
        let mut memory = flash(&sim);

        memory.write_byte(0x0500, 0x11).await.unwrap();
        assert_eq!(sim.sector_erases(), vec![]);
        memory.write_byte(0x0501, 0x22).await.unwrap();
        assert_eq!(sim.sector_erases(), vec![0x0000]);
        assert_eq!(memory.read_word(0x0500).await.unwrap(), 0x22FF);
    });
}

#[test]
fn protection_and_lock() {
    block_on(async {
        let sim = Sim::w25q80();
        let mut memory = flash(&sim);

        memory.set_protection_size(ProtectionSize::Kb512).await.unwrap();
        memory.lock_protection_bits().await.unwrap();
        assert_eq!(memory.protection_size().await.unwrap(), ProtectionSize::Kb512);
        assert!(memory.read_status().await.unwrap().locked());

        memory.unlock_protection_bits().await.unwrap();
        memory.clear_protection().await.unwrap();

        assert_eq!(memory.protection_size().await.unwrap(), ProtectionSize::None);
        assert_eq!(
            sim.events(),
            vec![
                Event::WriteStatus(0b0001_0000),
                Event::WriteStatus(0b1001_0000),
                Event::WriteProtect(true),
                Event::WriteProtect(false),
                Event::WriteStatus(0b0001_0000),
                Event::WriteStatus(0b0000_0000),
            ]
        );
        assert_eq!(
            memory.set_protection_size(ProtectionSize::Mb16).await,
            Err(Error::Value)
        );
    });
}

#[test]
fn status2_on_chip_without_one() {
    let sim = Sim::by25d40();
    let mut memory: AsyncBY25D40<_, _, _> =
        AsyncFlash::new(sim.spi(), sim.wp(), NoDelay::default());
    assert_eq!(block_on(memory.read_status2()), Err(Error::Value));
}

#[test]
fn bounded_wait_times_out() {
    let sim = Sim::w25q80();
    sim.state().stuck_busy = true;
    let mut memory = flash(&sim).with_busy_poll(BusyPoll::bounded(3, 10));

    assert_eq!(block_on(memory.erase_sector(0)), Err(Error::Timeout));

    let (_, _, delay) = memory.release();
    assert_eq!(delay.waited_ns, 2 * 10_000);
}

#[test]
fn unbounded_wait_yields_until_idle() {
    let sim = Sim::w25q80();
    sim.state().busy_left = 100;
    let mut memory = flash(&sim);

    block_on(memory.wait_ready()).unwrap();
    assert_eq!(sim.state().transactions, 101);
}

#[test]
fn nor_flash_traits() {
    block_on(async {
        let sim = Sim::w25q80();
        sim.fill(0x4000, &[0; 4]);
        let mut memory = flash(&sim);
        let mut buff = [0; 3];

        assert_eq!(ReadNorFlash::capacity(&memory), 0x10_0000);
        NorFlash::erase(&mut memory, 0x4000, 0x5000).await.unwrap();
        NorFlash::write(&mut memory, 0x4000, &[1, 2, 3]).await.unwrap();
        ReadNorFlash::read(&mut memory, 0x4000, &mut buff).await.unwrap();

        assert_eq!(buff, [1, 2, 3]);
        assert_eq!(sim.sector_erases(), vec![0x4000]);
        assert_eq!(
            NorFlash::erase(&mut memory, 0x4000, 0x4100).await,
            Err(Error::NotAligned)
        );
        assert_eq!(
            NorFlash::write(&mut memory, 0x0F_FFFF, &[1, 2]).await,
            Err(Error::OutOfBounds)
        );
    });
}
