//! Writer/reader symmetry and failure modes of the tagged codec.

use once_cell::sync::Lazy;
use proptest::prelude::*;
use tally_codec::reader::MAX_STRING_LEN;
use tally_codec::{tags, CodecError, CodecResult, TagRegistry, TaggedReader, TaggedRecord, TaggedWriter};

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone, PartialEq)]
struct Shape {
    name: Option<String>,
    points: Vec<Point>,
    origin: Option<Point>,
}

#[derive(Debug, Clone, PartialEq)]
enum Rec {
    Point(Point),
    Shape(Shape),
}

impl TaggedRecord<Rec> for Point {
    const TYPE_NAME: &'static str = "Point";

    fn write_body(&self, out: &mut TaggedWriter<'_, Rec>) -> CodecResult<()> {
        out.write_int(self.x)?;
        out.write_int(self.y)
    }

    fn read_body(input: &mut TaggedReader<'_, Rec>) -> CodecResult<Self> {
        Ok(Point {
            x: input.read_int()?,
            y: input.read_int()?,
        })
    }

    fn into_record(self) -> Rec {
        Rec::Point(self)
    }

    fn from_record(record: Rec) -> Result<Self, Rec> {
        match record {
            Rec::Point(p) => Ok(p),
            other => Err(other),
        }
    }
}

impl TaggedRecord<Rec> for Shape {
    const TYPE_NAME: &'static str = "Shape";

    fn write_body(&self, out: &mut TaggedWriter<'_, Rec>) -> CodecResult<()> {
        out.write_utf(self.name.as_deref())?;
        out.write_list(&self.points)?;
        out.write(self.origin.as_ref())
    }

    fn read_body(input: &mut TaggedReader<'_, Rec>) -> CodecResult<Self> {
        Ok(Shape {
            name: input.read_utf()?,
            points: input.read_list()?,
            origin: input.read()?,
        })
    }

    fn into_record(self) -> Rec {
        Rec::Shape(self)
    }

    fn from_record(record: Rec) -> Result<Self, Rec> {
        match record {
            Rec::Shape(s) => Ok(s),
            other => Err(other),
        }
    }
}

static TAGS: Lazy<TagRegistry<Rec>> = Lazy::new(|| {
    TagRegistry::new()
        .register::<Point>(tags::NEXT_TAG)
        .and_then(|r| r.register::<Shape>(tags::NEXT_TAG + 1))
        .unwrap()
});

fn encode(f: impl FnOnce(&mut TaggedWriter<'_, Rec>) -> CodecResult<()>) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut out = TaggedWriter::new(&mut buf, &TAGS);
    f(&mut out).unwrap();
    buf
}

#[test]
fn primitives_round_trip() {
    let buf = encode(|out| {
        out.write_bool(true)?;
        out.write_byte(-7)?;
        out.write_short(-12345)?;
        out.write_char('é')?;
        out.write_int(i32::MIN)?;
        out.write_long(i64::MAX)?;
        out.write_float(1.5)?;
        out.write_double(-0.25)?;
        out.write_utf(Some("héllo"))?;
        out.write_utf(None)?;
        out.write_utf(Some(""))
    });

    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    assert!(input.read_bool().unwrap());
    assert_eq!(input.read_byte().unwrap(), -7);
    assert_eq!(input.read_short().unwrap(), -12345);
    assert_eq!(input.read_char().unwrap(), 'é');
    assert_eq!(input.read_int().unwrap(), i32::MIN);
    assert_eq!(input.read_long().unwrap(), i64::MAX);
    assert_eq!(input.read_float().unwrap(), 1.5);
    assert_eq!(input.read_double().unwrap(), -0.25);
    assert_eq!(input.read_utf().unwrap().as_deref(), Some("héllo"));
    assert_eq!(input.read_utf().unwrap(), None);
    assert_eq!(input.read_utf().unwrap().as_deref(), Some(""));
    assert!(bytes.is_empty());
}

#[test]
fn int_is_tag_then_big_endian() {
    let buf = encode(|out| out.write_int(0x0102_0304));
    assert_eq!(buf, vec![tags::INT, 1, 2, 3, 4]);
}

#[test]
fn null_string_is_tag_and_marker_only() {
    let buf = encode(|out| out.write_utf(None));
    assert_eq!(buf, vec![tags::STRING, 1]);
}

#[test]
fn nested_records_round_trip() {
    let shape = Shape {
        name: Some("triangle".into()),
        points: vec![Point { x: 0, y: 0 }, Point { x: 3, y: 0 }, Point { x: 0, y: 4 }],
        origin: None,
    };
    let buf = encode(|out| {
        out.write_record(&shape)?;
        out.write::<Shape>(None)
    });

    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    assert_eq!(input.read_required::<Shape>().unwrap(), shape);
    assert_eq!(input.read::<Shape>().unwrap(), None);
}

#[test]
fn read_any_dispatches_on_tag() {
    let buf = encode(|out| {
        out.write_record(&Point { x: 1, y: 2 })?;
        out.write_record(&Shape {
            name: None,
            points: vec![],
            origin: Some(Point { x: 9, y: 9 }),
        })
    });
    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    assert!(matches!(input.read_any().unwrap(), Some(Rec::Point(_))));
    assert!(matches!(input.read_any().unwrap(), Some(Rec::Shape(_))));
}

#[test]
fn wrong_tag_names_expected_and_actual() {
    let buf = encode(|out| out.write_long(5));
    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    match input.read_int() {
        Err(CodecError::WrongTag { expected, actual }) => {
            assert_eq!(expected, tags::INT);
            assert_eq!(actual, tags::LONG);
        }
        other => panic!("expected WrongTag, got {:?}", other),
    }
}

#[test]
fn record_of_other_registered_type_is_wrong_tag() {
    let buf = encode(|out| out.write_record(&Point { x: 1, y: 1 }));
    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    let err = input.read::<Shape>().unwrap_err();
    assert!(matches!(err, CodecError::WrongTag { .. }));
}

#[test]
fn unregistered_tag_is_unknown_tag() {
    let bytes = [99u8, 0, 0, 0];
    let mut slice = &bytes[..];
    let mut input = TaggedReader::new(&mut slice, &TAGS);
    let err = input.read::<Point>().unwrap_err();
    assert!(matches!(err, CodecError::UnknownTag { tag: 99 }));
    assert!(err.is_data_error());
}

#[test]
fn writing_unregistered_type_fails_before_output() {
    #[derive(Debug)]
    struct Stray;
    impl TaggedRecord<Rec> for Stray {
        const TYPE_NAME: &'static str = "Stray";
        fn write_body(&self, _: &mut TaggedWriter<'_, Rec>) -> CodecResult<()> {
            Ok(())
        }
        fn read_body(_: &mut TaggedReader<'_, Rec>) -> CodecResult<Self> {
            Ok(Stray)
        }
        fn into_record(self) -> Rec {
            Rec::Point(Point { x: 0, y: 0 })
        }
        fn from_record(record: Rec) -> Result<Self, Rec> {
            Err(record)
        }
    }

    let mut buf = Vec::new();
    let mut out = TaggedWriter::new(&mut buf, &TAGS);
    let err = out.write_record(&Stray).unwrap_err();
    assert!(err.is_programmer_error());
    let err = out.write_list::<Stray>(&[]).unwrap_err();
    assert!(err.is_programmer_error());
    assert!(buf.is_empty());
}

#[test]
fn truncation_is_detected_at_every_cut() {
    let shape = Shape {
        name: Some("square".into()),
        points: vec![Point { x: 1, y: 1 }, Point { x: 2, y: 2 }],
        origin: Some(Point { x: 0, y: 0 }),
    };
    let buf = encode(|out| out.write_record(&shape));
    for cut in 0..buf.len() {
        let mut bytes = &buf[..cut];
        let mut input = TaggedReader::new(&mut bytes, &TAGS);
        let err = input.read_required::<Shape>().unwrap_err();
        assert!(
            matches!(err, CodecError::Truncated { .. }),
            "cut at {} gave {:?}",
            cut,
            err
        );
    }
}

#[test]
fn negative_list_count_is_rejected() {
    let buf = encode(|out| out.write_int(-1));
    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    let err = input.read_list::<Point>().unwrap_err();
    assert!(matches!(err, CodecError::InvalidLength { what: "list", .. }));
}

#[test]
fn oversized_string_is_refused_before_output() {
    let huge = "x".repeat(MAX_STRING_LEN as usize + 1);
    let mut buf = Vec::new();
    let mut out = TaggedWriter::new(&mut buf, &TAGS);
    let err = out.write_str(&huge).unwrap_err();
    assert!(matches!(err, CodecError::InvalidLength { what: "string", .. }));
    assert!(buf.is_empty());

    let limit = "y".repeat(MAX_STRING_LEN as usize);
    let buf = encode(|out| out.write_str(&limit));
    let mut bytes = buf.as_slice();
    let mut input = TaggedReader::new(&mut bytes, &TAGS);
    assert_eq!(input.read_str().unwrap().len(), MAX_STRING_LEN as usize);
}

#[test]
fn bytes_written_tracks_output() {
    let mut buf = Vec::new();
    let mut out = TaggedWriter::new(&mut buf, &TAGS);
    out.write_long(1).unwrap();
    out.write_utf(Some("abc")).unwrap();
    assert_eq!(out.bytes_written(), 9 + 2 + 4 + 3);
    assert_eq!(buf.len(), 18);
}

proptest! {
    #[test]
    fn scalars_round_trip(b in any::<bool>(), i in any::<i32>(), l in any::<i64>(), c in any::<char>()) {
        let buf = encode(|out| {
            out.write_bool(b)?;
            out.write_int(i)?;
            out.write_long(l)?;
            out.write_char(c)
        });
        let mut bytes = buf.as_slice();
        let mut input = TaggedReader::new(&mut bytes, &TAGS);
        prop_assert_eq!(input.read_bool().unwrap(), b);
        prop_assert_eq!(input.read_int().unwrap(), i);
        prop_assert_eq!(input.read_long().unwrap(), l);
        prop_assert_eq!(input.read_char().unwrap(), c);
    }

    #[test]
    fn strings_round_trip(s in proptest::option::of(".*")) {
        let buf = encode(|out| out.write_utf(s.as_deref()));
        let mut bytes = buf.as_slice();
        let mut input = TaggedReader::new(&mut bytes, &TAGS);
        prop_assert_eq!(input.read_utf().unwrap(), s);
    }

    #[test]
    fn point_lists_round_trip(coords in proptest::collection::vec((any::<i32>(), any::<i32>()), 0..32)) {
        let points: Vec<Point> = coords.into_iter().map(|(x, y)| Point { x, y }).collect();
        let buf = encode(|out| out.write_list(&points));
        let mut bytes = buf.as_slice();
        let mut input = TaggedReader::new(&mut bytes, &TAGS);
        prop_assert_eq!(input.read_list::<Point>().unwrap(), points);
    }
}
