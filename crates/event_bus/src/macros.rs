/// Declares a zero-sized event category marker.
///
/// ```rust
/// use event_bus::{define_category, EventCategory};
///
/// define_category!(pub Game);
/// assert_eq!(Game::NAME, "Game");
/// ```
#[macro_export]
macro_rules! define_category {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::EventCategory for $name {
            const NAME: &'static str = stringify!($name);
        }
    };
}

/// Declares a poolable event record belonging to a category.
///
/// Generates the struct with a hidden origin tag, a `reset` method taking every
/// field in declaration order, and the [`Event`](crate::Event) and
/// [`EventRecord`](crate::EventRecord) implementations. An optional `debug`
/// line is surfaced once per dispatch as `[Name] sent by [origin] : text`.
///
/// ```rust
/// use event_bus::{define_category, define_event, Event};
///
/// define_category!(pub Example);
///
/// define_event! {
///     /// A number was picked.
///     pub struct NumberSet in Example {
///         pub number: i32,
///     }
///     debug: "Setting a number."
/// }
///
/// let mut event = NumberSet::default();
/// event.reset(8);
/// assert_eq!(event.number, 8);
/// assert!(event.debug_data().ends_with("Setting a number."));
/// ```
#[macro_export]
macro_rules! define_event {
    (@debug $self:ident, $name:ident) => {
        ::std::string::String::new()
    };
    (@debug $self:ident, $name:ident, $text:expr) => {
        ::std::format!("[{}] sent by [{}] : {}", stringify!($name), $self.origin, $text)
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $category:ty {
            $($field_vis:vis $field:ident : $field_type:ty),* $(,)?
        }
        $(debug: $text:expr)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            origin: ::std::string::String,
            $($field_vis $field: $field_type),*
        }

        impl $name {
            /// Overwrites every payload field. The pool never clears records, so
            /// producers call this after acquiring one.
            #[allow(clippy::too_many_arguments)]
            pub fn reset(&mut self, $($field: $field_type),*) -> &mut Self {
                $(self.$field = $field;)*
                self
            }
        }

        impl $crate::Event for $name {
            fn origin(&self) -> &str {
                &self.origin
            }

            fn set_origin(&mut self, origin: &str) {
                self.origin.clear();
                self.origin.push_str(origin);
            }

            fn event_name(&self) -> &'static str {
                stringify!($name)
            }

            fn debug_data(&self) -> ::std::string::String {
                $crate::define_event!(@debug self, $name $(, $text)?)
            }
        }

        impl $crate::EventRecord for $name {
            type Category = $category;
        }
    };
}
