/// Expands to the name of the enclosing function.
///
/// Closures are attributed to the function that contains them.
///
/// ```rust
/// fn parse_header() -> &'static str {
///     exscope::function_name!()
/// }
/// assert_eq!(parse_header(), "parse_header");
/// ```
#[macro_export]
macro_rules! function_name {
    () => {{
        fn marker() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let mut name = type_name_of(marker);
        name = name.strip_suffix("::marker").unwrap_or(name);
        while let Some(outer) = name.strip_suffix("::{{closure}}") {
            name = outer;
        }
        name.rsplit("::").next().unwrap_or(name)
    }};
}

/// Raises an exception of the given kind with a formatted message.
///
/// The raise site records the file, line and enclosing function. The message is
/// formatted into the thread's bounded buffer; an empty message falls back to the kind's
/// default message.
///
/// ```rust, ignore
/// raise!(PARSE_ERROR, "unexpected token '{}' at offset {}", token, offset);
/// raise!(IO_ERROR);
/// ```
#[macro_export]
macro_rules! raise {
    ($kind:expr) => {
        $crate::region::raise_at(
            &$kind,
            $crate::frames::Site::new(file!(), line!(), $crate::function_name!()),
            format_args!(""),
        )
    };
    ($kind:expr, $($arg:tt)+) => {
        $crate::region::raise_at(
            &$kind,
            $crate::frames::Site::new(file!(), line!(), $crate::function_name!()),
            format_args!($($arg)+),
        )
    };
}

/// Runs a call with a frame pushed for its call site.
///
/// Either a plain function call, whose path names the frame, or a labelled expression:
///
/// ```rust, ignore
/// let header = traced!(parser::read_header(&mut input));
/// let total = traced!("sum rows" => rows.iter().map(Row::value).sum::<u64>());
/// ```
#[macro_export]
macro_rules! traced {
    ($label:literal => $body:expr) => {{
        let _call_site = $crate::trace::CallSite::enter(line!(), file!(), $label);
        $body
    }};
    ($($func:ident)::+ ( $($arg:expr),* $(,)? )) => {{
        let _call_site =
            $crate::trace::CallSite::enter(line!(), file!(), stringify!($($func)::+));
        $($func)::+($($arg),*)
    }};
}

/// Opens an explicit region that must be closed with
/// [`RegionGuard::end`](crate::region::RegionGuard::end).
///
/// Leaving the region without closing it is reported by the nearest protected region.
///
/// ```rust, ignore
/// for item in items {
///     let region = enter_region!();
///     process(item);
///     region.end();
/// }
/// ```
#[macro_export]
macro_rules! enter_region {
    () => {
        $crate::region::RegionGuard::enter_at($crate::frames::Site::new(
            file!(),
            line!(),
            $crate::function_name!(),
        ))
    };
    ($label:literal) => {
        $crate::region::RegionGuard::enter_at($crate::frames::Site::new(file!(), line!(), $label))
    };
}
