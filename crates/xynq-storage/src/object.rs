//! Stored objects.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use xynq_types::TypeSchemaRef;

pub type ObjectGuid = u64;

/// Raw handle to a stored object. Valid while the object stays in its
/// vault; a request must not hold handles across its own deletes.
pub type ObjectHandle = *mut Object;

/// One stored object: guid plus a payload sized and aligned per its
/// schema. The payload starts zeroed, so unset fields read as zero.
pub struct Object {
    guid: ObjectGuid,
    schema: TypeSchemaRef,
    data: *mut u8,
}

// Objects are shared through vault locks; the payload pointer itself is
// stable for the object's lifetime.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    pub(crate) fn create(guid: ObjectGuid, schema: TypeSchemaRef) -> Box<Object> {
        let layout = Self::layout(schema);
        let data = unsafe { alloc_zeroed(layout) };
        if data.is_null() {
            handle_alloc_error(layout);
        }
        Box::new(Object { guid, schema, data })
    }

    fn layout(schema: TypeSchemaRef) -> Layout {
        Layout::from_size_align(schema.size.max(1), schema.alignment.max(1))
            .expect("invalid schema layout")
    }

    pub fn guid(&self) -> ObjectGuid {
        self.guid
    }

    pub fn schema(&self) -> TypeSchemaRef {
        self.schema
    }

    pub fn data(&self) -> *const u8 {
        self.data
    }

    pub fn data_mut(&self) -> *mut u8 {
        self.data
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        unsafe { dealloc(self.data, Self::layout(self.schema)) };
    }
}
