//! Read-only reflection over mappings and live Structs.
//!
//! Reflection is driven by the same descriptor tables as walk: a
//! [FieldValue] pairs one field's descriptor with the Struct holding its
//! value, without copying either.

use crate::list::{BlobList, BoolList, NumberList, StructList};
use crate::mapping::FieldDescr;
use crate::structs::Struct;
use crate::walk::{self, Number};
use crate::FieldType;

/// FieldValue is a live, read-only view of one field of a Struct.
pub struct FieldValue<'a> {
    s: &'a Struct,
    descr: &'a FieldDescr,
}

impl<'a> FieldValue<'a> {
    pub fn name(&self) -> &'a str {
        &self.descr.name
    }

    pub fn field_type(&self) -> FieldType {
        self.descr.field_type
    }

    pub fn field_num(&self) -> u16 {
        self.descr.field_num
    }

    pub fn descr(&self) -> &'a FieldDescr {
        self.descr
    }

    pub fn is_set(&self) -> bool {
        self.s.is_set(self.descr.field_num)
    }

    /// The numeric value of an integer or float field; None otherwise.
    pub fn as_number(&self) -> Option<Number> {
        if self.descr.field_type.is_scalar() && self.descr.field_type != FieldType::Bool {
            Some(walk::scalar_number(self.s, self.descr))
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.descr.field_type {
            FieldType::Bool => Some(self.s.get::<bool>(self.descr.field_num)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self.descr.field_type {
            FieldType::String => Some(self.s.get_str(self.descr.field_num)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self.descr.field_type {
            FieldType::Bytes => Some(self.s.get_bytes(self.descr.field_num)),
            _ => None,
        }
    }

    /// The enum label of the current value, for enum-typed fields whose
    /// group defines it.
    pub fn enum_label(&self) -> Option<&'a str> {
        let group = self.descr.enum_group.as_ref()?;
        match walk::scalar_number(self.s, self.descr) {
            Number::Unsigned(v) if v <= u16::MAX as u64 => group.label(v as u16),
            _ => None,
        }
    }

    pub fn child(&self) -> Option<&'a Struct> {
        match self.descr.field_type {
            FieldType::Struct => self.s.child(self.descr.field_num),
            _ => None,
        }
    }

    pub fn bools(&self) -> Option<&'a BoolList> {
        match self.descr.field_type {
            FieldType::ListBools => self.s.bools(self.descr.field_num),
            _ => None,
        }
    }

    pub fn numbers(&self) -> Option<&'a NumberList> {
        self.descr
            .field_type
            .list_element_width()
            .and_then(|_| self.s.numbers(self.descr.field_num))
    }

    pub fn blobs(&self) -> Option<&'a BlobList> {
        match self.descr.field_type {
            FieldType::ListBytes | FieldType::ListStrings => self.s.blobs(self.descr.field_num),
            _ => None,
        }
    }

    pub fn structs(&self) -> Option<&'a StructList> {
        match self.descr.field_type {
            FieldType::ListStructs => self.s.structs(self.descr.field_num),
            _ => None,
        }
    }
}

/// Iterate live views of every field of `s`, in field number order.
pub fn fields(s: &Struct) -> impl Iterator<Item = FieldValue<'_>> {
    s.mapping().fields().map(move |descr| FieldValue { s, descr })
}

/// A live view of the named field, if the mapping defines it.
pub fn field<'a>(s: &'a Struct, name: &str) -> Option<FieldValue<'a>> {
    s.mapping()
        .by_name(name)
        .map(|descr| FieldValue { s, descr })
}

#[cfg(test)]
mod test {
    use super::{field, fields};
    use crate::walk::test::{s1_car, vehicle_mapping};
    use crate::{Number, Struct};

    #[test]
    fn test_field_views() {
        let car = s1_car();

        let names: Vec<_> = fields(&car).map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["Manufacturer", "Model", "Year"]);

        let year = field(&car, "Year").unwrap();
        assert!(year.is_set());
        assert_eq!(year.as_number(), Some(Number::Unsigned(2010)));
        assert_eq!(year.as_str(), None);
        assert_eq!(year.enum_label(), None);

        let make = field(&car, "Manufacturer").unwrap();
        assert_eq!(make.enum_label(), Some("Toyota"));
        assert!(field(&car, "Nope").is_none());
    }

    #[test]
    fn test_nested_views() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set_child(1, s1_car()).unwrap();

        let car = field(&vehicle, "Car").unwrap();
        assert!(car.is_set());
        let child = car.child().unwrap();
        assert_eq!(child.name(), "Car");
        assert_eq!(child.get::<u16>(2), 2010);

        let truck = field(&vehicle, "Truck").unwrap();
        assert!(!truck.is_set());
        assert!(truck.structs().is_none());
    }
}
