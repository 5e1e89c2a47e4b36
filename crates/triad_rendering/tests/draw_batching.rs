//! Integration tests for sorted, batched draw submission.

use std::sync::Arc;

use proptest::prelude::*;
use triad_core::{
    AttributeKey, AttributeStoreAllocator, BindTarget, BufferUsage, EngineConfig, GpuReleaseQueue,
    IndexGroupAllocator, IndexType, ScopedBuffer, TripleBufferCoordinator,
};
use triad_rendering::{
    present_frame, ArrayDraw, AttributeFormat, DeviceCall, DrawBatchList, DrawCallDescriptor,
    DrawCommand, DrawElementId, DrawOrder, DrawStats, HeadlessDevice, IndexedDraw, PrimitiveType,
    ProgramId, UniformBlock,
};

fn setup() -> (Arc<TripleBufferCoordinator>, DrawBatchList) {
    let coordinator = Arc::new(TripleBufferCoordinator::new());
    let list = DrawBatchList::new(Arc::clone(&coordinator), &EngineConfig::default());
    (coordinator, list)
}

fn frame(coordinator: &TripleBufferCoordinator) {
    coordinator.complete_simulation_frame();
    coordinator.begin_presentation_frame();
}

/// Shares every handle so only the program (and order) tell descriptors apart.
fn base() -> DrawCallDescriptor {
    DrawCallDescriptor::new(
        ProgramId(0),
        Arc::new(ArrayDraw::new(PrimitiveType::Triangles, 0..3)),
    )
}

fn with_program(base: &DrawCallDescriptor, program: u32) -> DrawCallDescriptor {
    let mut descriptor = base.clone();
    descriptor.program = Some(ProgramId(program));
    descriptor
}

fn program_runs(programs: &[u32]) -> usize {
    programs.windows(2).filter(|pair| pair[0] != pair[1]).count() + usize::from(!programs.is_empty())
}

proptest! {
    #[test]
    fn two_programs_end_up_contiguous(programs in proptest::collection::vec(1u32..=2, 1..64)) {
        let (coordinator, list) = setup();
        let base = base();
        let ids: Vec<(DrawElementId, u32)> = programs
            .iter()
            .map(|&p| (list.add_element(with_program(&base, p)), p))
            .collect();
        frame(&coordinator);

        let presented: Vec<u32> = list
            .present_order()
            .iter()
            .map(|id| ids.iter().find(|(other, _)| other == id).map(|(_, p)| *p).unwrap())
            .collect();
        prop_assert_eq!(presented.len(), programs.len());
        let distinct = usize::from(programs.contains(&1)) + usize::from(programs.contains(&2));
        prop_assert_eq!(program_runs(&presented), distinct);
    }
}

#[test]
fn test_program_change_resorts_exactly_once() {
    let (coordinator, list) = setup();
    let base = base();
    let a = list.add_element(with_program(&base, 1));
    let b = list.add_element(with_program(&base, 2));
    let c = list.add_element(with_program(&base, 1));
    frame(&coordinator);
    assert_eq!(list.present_order(), vec![a, c, b]);
    let sorts = list.sort_count();

    assert!(list.update_element(a, with_program(&base, 2)));
    assert!(list.is_dirty());
    frame(&coordinator);
    assert_eq!(list.sort_count(), sorts + 1);
    assert_eq!(list.present_order(), vec![c, a, b]);

    frame(&coordinator);
    frame(&coordinator);
    assert_eq!(list.sort_count(), sorts + 1);
}

#[test]
fn test_present_slot_isolated_from_edits() {
    let (coordinator, list) = setup();
    let base = base();
    let a = list.add_element(with_program(&base, 1));
    frame(&coordinator);
    assert_eq!(list.present_order(), vec![a]);

    let b = list.add_element(with_program(&base, 1));
    assert!(list.remove_element(a));
    assert_eq!(list.present_order(), vec![a]);

    coordinator.complete_simulation_frame();
    assert_eq!(list.present_order(), vec![a]);

    coordinator.begin_presentation_frame();
    assert_eq!(list.present_order(), vec![b]);
}

#[test]
fn test_draw_order_change_triggers_resort() {
    let (coordinator, list) = setup();
    let base = base();
    let first = Arc::new(DrawOrder::new(0));
    let second = Arc::new(DrawOrder::new(10));
    let x = list.add_element(with_program(&base, 1).with_order(Arc::clone(&second)));
    let y = list.add_element(with_program(&base, 2).with_order(Arc::clone(&first)));
    frame(&coordinator);
    assert_eq!(list.present_order(), vec![y, x]);
    assert!(!list.is_dirty());

    second.set(-5);
    assert!(list.is_dirty());
    frame(&coordinator);
    assert_eq!(list.present_order(), vec![x, y]);

    list.set_draw_order_comparator(Arc::new(|a: &DrawOrder, b: &DrawOrder| b.value().cmp(&a.value())));
    frame(&coordinator);
    assert_eq!(list.present_order(), vec![y, x]);
}

#[test]
fn test_removed_element_stops_observing_its_order() {
    let (coordinator, list) = setup();
    let base = base();
    let shared = Arc::new(DrawOrder::new(1));
    let a = list.add_element(with_program(&base, 1).with_order(Arc::clone(&shared)));
    let b = list.add_element(with_program(&base, 2).with_order(Arc::clone(&shared)));
    frame(&coordinator);
    assert_eq!(shared.observer_count(), 1);

    // One element still carries the handle.
    assert!(list.remove_element(a));
    frame(&coordinator);
    shared.set(2);
    assert!(list.is_dirty());
    frame(&coordinator);

    assert!(list.remove_element(b));
    frame(&coordinator);
    assert_eq!(shared.observer_count(), 0);
    let sorts = list.sort_count();
    shared.set(99);
    assert!(!list.is_dirty());
    frame(&coordinator);
    assert_eq!(list.sort_count(), sorts);
}

#[test]
fn test_replaced_order_handle_no_longer_resorts() {
    let (coordinator, list) = setup();
    let base = base();
    let old = Arc::new(DrawOrder::new(0));
    let new = Arc::new(DrawOrder::new(0));
    let id = list.add_element(with_program(&base, 1).with_order(Arc::clone(&old)));
    frame(&coordinator);

    assert!(list.update_element(id, with_program(&base, 1).with_order(Arc::clone(&new))));
    frame(&coordinator);
    assert_eq!(old.observer_count(), 0);
    assert_eq!(new.observer_count(), 1);

    let sorts = list.sort_count();
    old.set(5);
    assert!(!list.is_dirty());
    new.set(5);
    assert!(list.is_dirty());
    frame(&coordinator);
    assert_eq!(list.sort_count(), sorts + 1);
}

fn split_indices(config: &EngineConfig) -> (IndexGroupAllocator<u16>, Arc<dyn DrawCommand>) {
    let indices = IndexGroupAllocator::<u16>::with_config(config);
    let command: Arc<dyn DrawCommand> = Arc::new(IndexedDraw::new(PrimitiveType::Triangles, indices.clone()));
    (indices, command)
}

#[test]
fn test_disjoint_ranges_merge_into_multi_draw() {
    let config = EngineConfig::default();
    let (indices, command) = split_indices(&config);
    let first = indices.allocate_index_group(3).unwrap();
    let gap = indices.allocate_index_group(3).unwrap();
    let last = indices.allocate_index_group(3).unwrap();
    first.write(0, &[0, 1, 2]);
    last.write(0, &[3, 4, 5]);
    drop(gap);

    let coordinator = Arc::new(TripleBufferCoordinator::new());
    let list = DrawBatchList::new(Arc::clone(&coordinator), &config);
    list.add_element(DrawCallDescriptor::new(ProgramId(1), command));
    frame(&coordinator);

    let mut device = HeadlessDevice::new();
    let mut stats = DrawStats::default();
    list.draw(&mut device, &mut stats, Some).unwrap();
    assert!(device.calls().contains(&DeviceCall::MultiDrawElements(
        PrimitiveType::Triangles,
        IndexType::U16,
        vec![0..3, 6..9],
    )));
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.multi_draw_batches, 1);
    assert_eq!(stats.ranges_submitted, 2);

    let handle = indices.gpu_handle().unwrap();
    let uploaded: Vec<u16> = device.buffers().contents(handle).unwrap()[..18]
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(uploaded, vec![0, 1, 2, 0, 0, 0, 3, 4, 5]);

    device.set_multi_draw(false);
    device.take_calls();
    let mut stats = DrawStats::default();
    list.draw(&mut device, &mut stats, Some).unwrap();
    let draws: Vec<_> = device.calls().iter().filter(|c| c.is_draw()).cloned().collect();
    assert_eq!(
        draws,
        vec![
            DeviceCall::DrawElements(PrimitiveType::Triangles, IndexType::U16, 0..3),
            DeviceCall::DrawElements(PrimitiveType::Triangles, IndexType::U16, 6..9),
        ]
    );
    assert_eq!(stats.multi_draw_batches, 0);
}

#[test]
fn test_multi_draw_disabled_by_config() {
    let config = EngineConfig::from_toml_str("[draw]\nmulti_draw = false\n").unwrap();
    let (indices, command) = split_indices(&config);
    let _a = indices.allocate_index_group(3).unwrap();
    let gap = indices.allocate_index_group(3).unwrap();
    let _b = indices.allocate_index_group(3).unwrap();
    drop(gap);

    let coordinator = Arc::new(TripleBufferCoordinator::new());
    let list = DrawBatchList::new(Arc::clone(&coordinator), &config);
    list.add_element(DrawCallDescriptor::new(ProgramId(1), command));
    frame(&coordinator);

    let mut device = HeadlessDevice::new();
    let mut stats = DrawStats::default();
    list.draw(&mut device, &mut stats, Some).unwrap();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.multi_draw_batches, 0);
}

#[test]
fn test_invalid_empty_and_deselected_skipped() {
    let (coordinator, list) = setup();
    let (_indices, empty) = split_indices(&EngineConfig::default());
    list.add_element(DrawCallDescriptor::new(ProgramId(1), empty));
    list.add_element(DrawCallDescriptor::default());
    list.add_element(with_program(&base(), 7));
    list.add_element(with_program(&base(), 8));
    frame(&coordinator);

    let mut device = HeadlessDevice::new();
    let mut stats = DrawStats::default();
    list.draw(&mut device, &mut stats, |program| (program != ProgramId(8)).then_some(program))
        .unwrap();
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.draw_calls, 1);
    assert!(!device.calls().contains(&DeviceCall::UseProgram(ProgramId(8))));
}

#[test]
fn test_attribute_store_bound_once() {
    let config = EngineConfig::default();
    let stores = AttributeStoreAllocator::new(&config);
    let alloc = stores
        .attribute_store(AttributeKey::new(12, IndexType::U16), 4)
        .unwrap();
    alloc.store.write_records(alloc.records.start, &[[1.0f32, 2.0, 3.0]; 4]);

    let format = AttributeFormat::float(3, 12, 0);
    let uniforms = Arc::new(UniformBlock::from_pod(&[0.5f32; 4]));
    let shared = base()
        .with_attribute(0, Arc::clone(&alloc.store), format)
        .with_uniforms(uniforms);

    let (coordinator, list) = setup();
    list.add_element(with_program(&shared, 1));
    list.add_element(with_program(&shared, 1));
    frame(&coordinator);

    let mut device = HeadlessDevice::new();
    let mut stats = DrawStats::default();
    list.draw(&mut device, &mut stats, Some).unwrap();
    assert_eq!(stats.attribute_switches, 1);
    assert_eq!(stats.uniform_uploads, 1);
    assert_eq!(stats.program_switches, 1);

    let handle = alloc.store.lock().buffer().gpu_handle().unwrap();
    assert!(device.calls().contains(&DeviceCall::SetAttribute {
        slot: 0,
        buffer: Some(handle),
        offset: Some(0),
        format,
    }));
    let start = alloc.records.start * 12;
    let uploaded: Vec<f32> = device.buffers().contents(handle).unwrap()[start..start + 12]
        .chunks_exact(4)
        .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();
    assert_eq!(uploaded, vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_present_frame_releases_and_draws() {
    let (coordinator, list) = setup();
    list.add_element(with_program(&base(), 1));
    coordinator.complete_simulation_frame();

    let mut device = HeadlessDevice::new();
    let releases = GpuReleaseQueue::new();
    let mut scratch = ScopedBuffer::new(BufferUsage::Stream).with_release_queue(releases.clone());
    scratch.resize(64);
    scratch.flush(&mut device, BindTarget::Vertex).unwrap();
    assert_eq!(device.buffers().live_buffers(), 1);
    drop(scratch);

    let stats = present_frame(&coordinator, &[&releases], &[&list], &mut device).unwrap();
    assert_eq!(device.buffers().live_buffers(), 0);
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(coordinator.frame_counters().presentation, 1);
}
