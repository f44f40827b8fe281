use serde::Serialize;

#[derive(Debug, PartialEq)]
pub enum Error {
    InvalidPage,
    EmptyPage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageNumber {
    Number(u64),
    Last,
}

impl PageNumber {
    /// A missing `page` parameter means the first page.
    pub fn parse(raw: Option<&str>) -> Result<Self, Error> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Number(1)),
            Some("last") => Ok(Self::Last),
            Some(raw) => raw
                .parse::<u64>()
                .map(Self::Number)
                .map_err(|_| Error::InvalidPage),
        }
    }
}

/// Page arithmetic over a result set of `count` rows.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    pub count: u64,
    pub per_page: u32,
}

impl Paginator {
    pub fn new(count: u64, per_page: u32) -> Self {
        Self {
            count,
            per_page: per_page.max(1),
        }
    }

    /// An empty result still has one (empty) page.
    pub fn num_pages(&self) -> u64 {
        self.count.div_ceil(self.per_page as u64).max(1)
    }

    pub fn validate(&self, page: PageNumber) -> Result<PageRequest, Error> {
        let number = match page {
            PageNumber::Last => self.num_pages(),
            PageNumber::Number(0) => return Err(Error::EmptyPage),
            PageNumber::Number(number) if number > self.num_pages() => {
                return Err(Error::EmptyPage)
            }
            PageNumber::Number(number) => number,
        };

        Ok(PageRequest {
            number,
            offset: (number - 1) * self.per_page as u64,
            limit: self.per_page,
        })
    }

    pub fn has_next(&self, page: &PageRequest) -> bool {
        page.number < self.num_pages()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRequest {
    pub number: u64,
    pub offset: u64,
    pub limit: u32,
}

#[derive(Serialize, Debug)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    pub more: bool,
}

impl<T> Paginated<T> {
    pub fn new(results: Vec<T>, more: bool) -> Self {
        Self { results, more }
    }
}
