#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rompatch_rs::{Alignment, PlatformLayout, RomImage};

#[derive(Arbitrary, Debug)]
enum Op {
    Allocate { length: u8, aligned: bool, write: bool },
    Free { index: u8 },
}

#[derive(Arbitrary, Debug)]
struct Input {
    image: Vec<u8>,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let Ok(mut rom) = RomImage::from_bytes(input.image, PlatformLayout::new(0xFF)) else {
        return;
    };
    let mut live: Vec<(usize, usize)> = Vec::new();

    for op in input.ops {
        match op {
            Op::Allocate { length, aligned, write } => {
                let length = length as usize + 1;
                let alignment = if aligned { Alignment::Word } else { Alignment::Unaligned };
                let Ok(offset) = rom.allocate_with(length, 0, alignment) else {
                    continue;
                };
                assert!(rom.read_bytes(offset, length).unwrap().iter().all(|&b| b == 0xFF));
                for &(other, other_len) in &live {
                    assert!(offset + length <= other || other + other_len <= offset);
                }
                if write {
                    rom.write_bytes(offset, &vec![0; length]).unwrap();
                }
                live.push((offset, length));
            }
            Op::Free { index } => {
                if live.is_empty() {
                    continue;
                }
                let (offset, length) = live.remove(index as usize % live.len());
                rom.free_space(offset, length).unwrap();
            }
        }
    }
});
