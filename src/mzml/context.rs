//! Element-path tracking for the mzML pull parser.

/// Maximum nesting of tracked elements.
pub const MAX_CONTEXT_DEPTH: usize = 64;

/// Tracked element the parser is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    /// Outside any tracked element
    None,
    /// `<mzML>`
    MzML,
    /// `<referenceableParamGroupList>`
    ParamGroupList,
    /// `<referenceableParamGroup>`
    ParamGroup,
    /// `<run>`
    Run,
    /// `<spectrumList>`
    SpectrumList,
    /// `<spectrum>`
    Spectrum,
    /// `<scanList>` inside a spectrum
    ScanList,
    /// `<scan>`
    Scan,
    /// `<scanWindow>`
    ScanWindow,
    /// `<precursorList>` inside a spectrum
    PrecursorList,
    /// `<precursor>` inside a spectrum
    Precursor,
    /// `<isolationWindow>` inside a spectrum precursor
    IsolationWindow,
    /// `<selectedIonList>`
    SelectedIonList,
    /// `<selectedIon>`
    SelectedIon,
    /// `<activation>`
    Activation,
    /// `<binaryDataArrayList>` inside a spectrum
    SpectrumArrayList,
    /// `<binaryDataArray>` inside a spectrum
    SpectrumArray,
    /// `<binary>` inside a spectrum
    SpectrumBinary,
    /// `<chromatogramList>`
    ChromatogramList,
    /// `<chromatogram>`
    Chromatogram,
    /// `<precursor>` inside a chromatogram
    ChromatogramPrecursor,
    /// `<isolationWindow>` inside a chromatogram precursor
    ChromatogramPrecursorWindow,
    /// `<product>` inside a chromatogram
    ChromatogramProduct,
    /// `<isolationWindow>` inside a chromatogram product
    ChromatogramProductWindow,
    /// `<binaryDataArrayList>` inside a chromatogram
    ChromatogramArrayList,
    /// `<binaryDataArray>` inside a chromatogram
    ChromatogramArray,
    /// `<binary>` inside a chromatogram
    ChromatogramBinary,
}

impl ParseContext {
    /// Local name of the element that opens (and closes) this context.
    pub fn element_name(self) -> &'static [u8] {
        use ParseContext::*;
        match self {
            None => b"",
            MzML => b"mzML",
            ParamGroupList => b"referenceableParamGroupList",
            ParamGroup => b"referenceableParamGroup",
            Run => b"run",
            SpectrumList => b"spectrumList",
            Spectrum => b"spectrum",
            ScanList => b"scanList",
            Scan => b"scan",
            ScanWindow => b"scanWindow",
            PrecursorList => b"precursorList",
            Precursor | ChromatogramPrecursor => b"precursor",
            IsolationWindow | ChromatogramPrecursorWindow | ChromatogramProductWindow => {
                b"isolationWindow"
            }
            SelectedIonList => b"selectedIonList",
            SelectedIon => b"selectedIon",
            Activation => b"activation",
            SpectrumArrayList | ChromatogramArrayList => b"binaryDataArrayList",
            SpectrumArray | ChromatogramArray => b"binaryDataArray",
            SpectrumBinary | ChromatogramBinary => b"binary",
            ChromatogramList => b"chromatogramList",
            Chromatogram => b"chromatogram",
            ChromatogramProduct => b"product",
        }
    }

    /// Context entered when element `name` starts inside `self`, if tracked.
    pub fn child(self, name: &[u8]) -> Option<ParseContext> {
        use ParseContext::*;
        let next = match (self, name) {
            (None | MzML, b"mzML") => MzML,
            (MzML, b"referenceableParamGroupList") => ParamGroupList,
            (ParamGroupList, b"referenceableParamGroup") => ParamGroup,
            (MzML, b"run") => Run,
            (Run, b"spectrumList") => SpectrumList,
            (SpectrumList, b"spectrum") => Spectrum,
            (Spectrum, b"scanList") => ScanList,
            (Spectrum, b"precursorList") => PrecursorList,
            (Spectrum, b"binaryDataArrayList") => SpectrumArrayList,
            (ScanList, b"scan") => Scan,
            (Scan, b"scanWindow") => ScanWindow,
            (PrecursorList, b"precursor") => Precursor,
            (Precursor, b"isolationWindow") => IsolationWindow,
            (Precursor, b"selectedIonList") => SelectedIonList,
            (Precursor, b"activation") => Activation,
            (SelectedIonList, b"selectedIon") => SelectedIon,
            (SpectrumArrayList, b"binaryDataArray") => SpectrumArray,
            (SpectrumArray, b"binary") => SpectrumBinary,
            (Run, b"chromatogramList") => ChromatogramList,
            (ChromatogramList, b"chromatogram") => Chromatogram,
            (Chromatogram, b"precursor") => ChromatogramPrecursor,
            (Chromatogram, b"product") => ChromatogramProduct,
            (Chromatogram, b"binaryDataArrayList") => ChromatogramArrayList,
            (ChromatogramPrecursor, b"isolationWindow") => ChromatogramPrecursorWindow,
            (ChromatogramProduct, b"isolationWindow") => ChromatogramProductWindow,
            (ChromatogramArrayList, b"binaryDataArray") => ChromatogramArray,
            (ChromatogramArray, b"binary") => ChromatogramBinary,
            _ => return Option::None,
        };
        Some(next)
    }

    /// True inside a `<binary>` element.
    pub fn is_binary(self) -> bool {
        matches!(self, ParseContext::SpectrumBinary | ParseContext::ChromatogramBinary)
    }
}

/// Bounded stack of contexts; the bottom entry is always [`ParseContext::None`].
#[derive(Debug, Clone)]
pub struct ContextStack {
    stack: Vec<ParseContext>,
}

impl Default for ContextStack {
    fn default() -> Self {
        let mut stack = Vec::with_capacity(MAX_CONTEXT_DEPTH);
        stack.push(ParseContext::None);
        Self { stack }
    }
}

impl ContextStack {
    /// Innermost context.
    pub fn top(&self) -> ParseContext {
        self.stack.last().copied().unwrap_or(ParseContext::None)
    }

    /// Number of entries including the bottom sentinel.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push a context; `false` when the stack is full.
    #[must_use]
    pub fn push(&mut self, ctx: ParseContext) -> bool {
        if self.stack.len() >= MAX_CONTEXT_DEPTH {
            return false;
        }
        self.stack.push(ctx);
        true
    }

    /// Pop the innermost context, never removing the sentinel.
    pub fn pop(&mut self) -> Option<ParseContext> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_transitions() {
        assert_eq!(ParseContext::None.child(b"mzML"), Some(ParseContext::MzML));
        assert_eq!(
            ParseContext::Chromatogram.child(b"precursor"),
            Some(ParseContext::ChromatogramPrecursor)
        );
        assert_eq!(ParseContext::Spectrum.child(b"product"), None);
        assert_eq!(ParseContext::Run.child(b"spectrum"), None);
    }

    #[test]
    fn test_element_names_round_trip() {
        let ctx = ParseContext::Precursor.child(b"isolationWindow").unwrap();
        assert_eq!(ctx.element_name(), b"isolationWindow");
    }

    #[test]
    fn test_stack_bound() {
        let mut stack = ContextStack::default();
        for _ in 1..MAX_CONTEXT_DEPTH {
            assert!(stack.push(ParseContext::MzML));
        }
        assert!(!stack.push(ParseContext::MzML));
        assert_eq!(stack.depth(), MAX_CONTEXT_DEPTH);
        while stack.pop().is_some() {}
        assert_eq!(stack.top(), ParseContext::None);
    }
}
