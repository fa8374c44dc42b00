use super::*;
use common::PageKind;

fn sample_indirection() -> Indirection {
    Indirection::None
}

#[test]
fn physical_page_write_and_read_round_trip() {
    let mut page = PhysicalPage::new(4);
    page.write(10).unwrap();
    page.write(20).unwrap();
    assert_eq!(page.read_one(0).unwrap(), 10);
    assert_eq!(page.read(0, 2).unwrap(), vec![10, 20]);
}

#[test]
fn physical_page_rejects_write_past_capacity() {
    let mut page = PhysicalPage::new(1);
    page.write(1).unwrap();
    assert!(matches!(page.write(2), Err(RowError::CapacityExhausted(_))));
}

#[test]
fn physical_page_rejects_out_of_bounds_read() {
    let page = PhysicalPage::new(2);
    assert!(matches!(page.read_one(0), Err(RowError::OutOfBounds(_))));
}

#[test]
fn column_page_append_writes_all_subpages_as_one_unit() {
    let mut page = ColumnPage::new(3, 4);
    let rid = Rid::base(0, 0, 0);
    let slot = page
        .append(&[100, 11, 12], rid, "00000000000001".into(), "111".into(), Indirection::None)
        .unwrap();

    assert_eq!(slot, 0);
    assert_eq!(page.read_row(0).unwrap(), vec![100, 11, 12]);
    assert_eq!(page.rid_at(0).unwrap(), rid);
    assert_eq!(page.schema_encoding_at(0).unwrap(), "111");
}

#[test]
fn column_page_rejects_wrong_arity() {
    let mut page = ColumnPage::new(3, 4);
    let err = page
        .append(&[1, 2], Rid::base(0, 0, 0), "t".into(), "11".into(), sample_indirection())
        .unwrap_err();
    assert!(matches!(err, RowError::OutOfBounds(_)));
}

#[test]
fn column_page_has_capacity_tracks_subpages() {
    let mut page = ColumnPage::new(1, 1);
    assert!(page.has_capacity());
    page.append(&[1], Rid::base(0, 0, 0), "t".into(), "1".into(), Indirection::None)
        .unwrap();
    assert!(!page.has_capacity());
}

#[test]
fn set_indirection_updates_forward_pointer() {
    let mut page = ColumnPage::new(1, 4);
    page.append(&[1], Rid::base(0, 0, 0), "t".into(), "1".into(), Indirection::None)
        .unwrap();

    let tail_rid = Rid::tail(0, 0, 0);
    page.set_indirection(0, Indirection::Forward(tail_rid)).unwrap();
    assert_eq!(page.indirection_at(0).unwrap().forward(), Some(tail_rid));
}

#[test]
fn set_indirection_rejects_out_of_range_slot() {
    let mut page = ColumnPage::new(1, 4);
    assert!(matches!(
        page.set_indirection(0, Indirection::Deleted),
        Err(RowError::OutOfBounds(_))
    ));
}

#[test]
fn base_and_tail_pages_share_shape_but_carry_distinct_rid_kinds() {
    let mut base: BasePage = ColumnPage::new(1, 4);
    let mut tail: TailPage = ColumnPage::new(1, 4);

    base.append(&[1], Rid::base(0, 0, 0), "t".into(), "1".into(), Indirection::None)
        .unwrap();
    tail.append(&[2], Rid::tail(0, 0, 0), "t".into(), "1".into(), Indirection::None)
        .unwrap();

    assert_eq!(base.rid_at(0).unwrap().kind, PageKind::Base);
    assert_eq!(tail.rid_at(0).unwrap().kind, PageKind::Tail);
}

#[test]
fn schema_encoding_marks_only_supplied_columns() {
    assert_eq!(schema_encoding_of(&[true, false, true]), "101");
    assert_eq!(schema_encoding_of(&[false, false]), "00");
}
