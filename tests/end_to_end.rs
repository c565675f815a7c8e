use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::io::Cursor;
use std::ptr::NonNull;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use decode_tap::error::BufferAccessError;
use decode_tap::inspect::{BufferInfo, inspect_batch};
use decode_tap::{
    BufferClassifier, BufferMapper, Config, FillOp, Frame, FrameOp, Hook, InterceptedSymbol,
    PixelBuffer, PixelFormat, ReplacementSequence, ResolutionState, Session, Size,
};

#[test]
fn fill_64x64_padded_frame() {
    const W: usize = 64;
    const H: usize = 64;
    const LUMA_STRIDE: usize = 128;
    const CHROMA_STRIDE: usize = 64;

    let mut luma = vec![0xAAu8; LUMA_STRIDE * H];
    let mut cb = vec![0xAAu8; CHROMA_STRIDE * H / 2];
    let mut cr = vec![0xAAu8; CHROMA_STRIDE * H / 2];
    let data = [luma.as_mut_ptr(), cb.as_mut_ptr(), cr.as_mut_ptr()];
    let linesize = [LUMA_STRIDE as i32, CHROMA_STRIDE as i32, CHROMA_STRIDE as i32];

    // SAFETY: each pointer covers linesize * rows bytes of a live Vec.
    let mut frame =
        unsafe { PixelBuffer::from_raw_parts(PixelFormat::Yuv420p, W as i32, H as i32, &data, &linesize) };
    frame.apply(&FrameOp::Fill(FillOp::new(16, 128))).unwrap();
    drop(frame);

    for row in luma.chunks(LUMA_STRIDE) {
        assert!(row[..W].iter().all(|&b| b == 16));
        assert!(row[W..].iter().all(|&b| b == 0xAA));
    }
    for plane in [&cb, &cr] {
        for row in plane.chunks(CHROMA_STRIDE) {
            assert!(row[..W / 2].iter().all(|&b| b == 128));
            assert!(row[W / 2..].iter().all(|&b| b == 0xAA));
        }
    }
}

#[test]
fn three_frame_sequence_cycles() {
    let size = Size::new(480, 360);
    let frame_len = PixelFormat::Yuv420p.frame_len(size);
    let bytes: Vec<u8> = (0..3 * frame_len).map(|i| (i / frame_len) as u8).collect();

    let mut sequence = ReplacementSequence::empty(size);
    sequence.load_from(Cursor::new(bytes)).unwrap();
    assert_eq!(sequence.frame_count(), 3);

    let two = sequence.frame_at(2).unwrap();
    let five = sequence.frame_at(5).unwrap();
    for index in 0..3 {
        assert_eq!(two.plane(index).unwrap().data, five.plane(index).unwrap().data);
    }
    assert_eq!(five.plane(0).unwrap().data[0], 2);
}

#[test]
fn replacement_copy_is_idempotent() {
    let size = Size::new(8, 4);
    let frame_len = PixelFormat::Yuv420p.frame_len(size);
    let sequence =
        ReplacementSequence::from_bytes((0..frame_len).map(|i| i as u8).collect(), size);
    let session = Session::new(Config::default()).with_replacement(sequence);

    let mut luma = vec![0u8; 16 * 4];
    let mut cb = vec![0u8; 8 * 2];
    let mut cr = vec![0u8; 8 * 2];
    let data = [luma.as_mut_ptr(), cb.as_mut_ptr(), cr.as_mut_ptr()];
    let linesize = [16, 8, 8];

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        // SAFETY: each pointer covers linesize * rows bytes of a live Vec.
        let mut frame =
            unsafe { PixelBuffer::from_raw_parts(PixelFormat::Yuv420p, 8, 4, &data, &linesize) };
        session.process_frame(&mut frame, 4);
        drop(frame);
        snapshots.push((luma.clone(), cb.clone(), cr.clone()));
    }
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(&luma[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
}

struct Driver {
    buffers: HashMap<u32, (i32, Vec<u8>)>,
    unmapped: RefCell<Vec<u32>>,
}

unsafe impl BufferMapper for Driver {
    type Id = u32;

    fn buffer_info(&self, id: u32) -> Result<BufferInfo, BufferAccessError> {
        self.buffers
            .get(&id)
            .map(|(type_tag, data)| BufferInfo {
                type_tag: *type_tag,
                size: data.len(),
            })
            .ok_or(BufferAccessError::Info { status: 6 })
    }

    fn map(&self, id: u32) -> Result<*const u8, BufferAccessError> {
        Ok(self.buffers[&id].1.as_ptr())
    }

    fn unmap(&self, id: u32) {
        self.unmapped.borrow_mut().push(id);
    }
}

#[test]
fn batch_continues_after_failed_buffer() {
    let driver = Driver {
        buffers: HashMap::from([
            (1, (0, vec![1; 40])),
            (3, (5, vec![0, 0, 0, 1, 0x67])),
            (4, (99, vec![9; 8])),
        ]),
        unmapped: RefCell::default(),
    };

    let report = inspect_batch(&driver, &BufferClassifier::default(), &[1, 2, 3, 4]);
    let inspected: Vec<u32> = report.inspected.iter().map(|b| b.id).collect();
    assert_eq!(inspected, [1, 3, 4]);
    assert_eq!(report.skipped, [(2, BufferAccessError::Info { status: 6 })]);
    assert_eq!(*driver.unmapped.borrow(), [1, 3, 4]);
    assert!(report.inspected[1].start_code.is_some());
    assert_eq!(report.inspected[2].category.label(), "Unknown");
}

type Answer = extern "C" fn() -> i32;

extern "C" fn answer() -> i32 {
    7
}

#[test]
fn concurrent_first_calls_share_one_resolution() {
    // SAFETY: `Answer` matches `answer`.
    let symbol: InterceptedSymbol<Answer> = unsafe { InterceptedSymbol::new(c"answer") };
    let session = Session::new(Config::default());
    let lookups = AtomicUsize::new(0);
    let resolver = |_: &CStr| {
        lookups.fetch_add(1, Ordering::SeqCst);
        NonNull::new(answer as *mut c_void)
    };

    let threads = 8;
    let barrier = Barrier::new(threads);
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                barrier.wait();
                let value = symbol.forward(&session, Hook::SendPacket, &resolver, -1, |f| f());
                assert_eq!(value, 7);
            });
        }
    });

    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert_eq!(symbol.state(), ResolutionState::Resolved);
    assert_eq!(session.calls(Hook::SendPacket), threads as u64);
}
